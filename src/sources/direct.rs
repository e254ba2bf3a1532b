// Enlaces directos: archivos locales y URLs http(s)

use regex::Regex;
use std::{path::Path, sync::LazyLock, time::Duration};
use tracing::debug;
use url::Url;

static BBCODE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[URL\]([^\s\[]+)\[/URL\]").expect("regex de BBCode válida")
});
static ID_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"id=(\d+)").expect("regex de id válida"));

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Quita los envoltorios `[URL]...[/URL]` y `<...>` de un enlace
pub fn plain_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let unwrapped = match BBCODE_URL.captures(raw) {
        Some(captures) => captures[1].to_string(),
        None => raw.to_string(),
    };

    let unwrapped = unwrapped
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .map(str::to_string)
        .unwrap_or(unwrapped);

    Some(unwrapped)
}

pub fn is_number(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// Id numérico desde `...?id=123` o un número suelto
pub fn extract_id(address: &str) -> Option<String> {
    if let Some(captures) = ID_PARAM.captures(address) {
        return Some(captures[1].to_string());
    }
    let trimmed = address.trim();
    is_number(trimmed).then(|| trimmed.to_string())
}

pub fn http_url(candidate: &str) -> Option<Url> {
    Url::parse(candidate)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Archivo existente o URL http(s) que responde
pub async fn is_valid_path_or_url(client: &reqwest::Client, candidate: &str) -> bool {
    if candidate.trim().is_empty() {
        return false;
    }

    if Path::new(candidate).is_file() {
        return true;
    }

    let Some(url) = http_url(candidate) else {
        return false;
    };

    match client.head(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            debug!("URL sin respuesta {}: {}", candidate, e);
            false
        }
    }
}
