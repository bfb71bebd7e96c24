// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EXTRAÇÃO DE CONTEÚDO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Fetch de conteúdo de URLs para os top resultados de um specialist.
// Cadeia de extração: readability → html2text → strip de tags.
// Hits no cache de URLs pulam o fetch; misses são cacheados após extrair.
// Falhas individuais retornam None e são ignoradas pelo chamador.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use crate::persistence::Store;
use crate::types::ScrapedPage;
use crate::utils::{clean_text, truncate_bytes};

/// Teto de bytes extraídos por página
const MAX_PAGE_BYTES: usize = 32 * 1024;

/// Extrator de conteúdo com cache write-through
pub struct ContentFetcher {
    store: Option<Arc<Store>>,
    client: reqwest::Client,
}

impl ContentFetcher {
    /// Cria o fetcher. Sem store, o cache é desabilitado (usado em testes).
    pub fn new(store: Option<Arc<Store>>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("research-crew/0.1")
            .build()
            .unwrap_or_default();
        Self { store, client }
    }

    /// Busca e extrai o conteúdo de uma URL dentro do timeout dado.
    ///
    /// Retorna None em qualquer falha (rede, status, extração vazia).
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Option<ScrapedPage> {
        if let Some(store) = &self.store {
            if let Ok(Some(cached)) = store.get_cached_url(url).await {
                log::debug!("cache hit: {url}");
                return Some(ScrapedPage {
                    url: url.to_string(),
                    title: cached.title.unwrap_or_default(),
                    content: cached.content,
                });
            }
        }

        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("fetch falhou para {url}: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            log::debug!("fetch {} para {url}", response.status());
            return None;
        }

        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => {
                log::debug!("corpo ilegível em {url}: {e}");
                return None;
            }
        };

        let (title, text) = extract_text(&html, url);
        if text.trim().is_empty() {
            return None;
        }

        let content = truncate_bytes(&clean_text(&text), MAX_PAGE_BYTES).to_string();

        if let Some(store) = &self.store {
            if let Err(e) = store.cache_url(url, &content, Some(&title)).await {
                log::warn!("⚠️ cache_url falhou para {url}: {e}");
            }
        }

        Some(ScrapedPage {
            url: url.to_string(),
            title,
            content,
        })
    }
}

/// Extrai (título, texto) de um documento HTML.
///
/// Tenta readability primeiro; se o texto vier curto demais, cai em
/// html2text sobre o documento inteiro; por último, strip de tags.
fn extract_text(html: &str, url: &str) -> (String, String) {
    if let Ok(parsed_url) = url::Url::parse(url) {
        let mut cursor = Cursor::new(html.as_bytes());
        if let Ok(product) = readability::extractor::extract(&mut cursor, &parsed_url) {
            // O readability retorna HTML limpo; converter para texto puro
            let text = html_to_text(&product.content);
            if !text.trim().is_empty() {
                return (product.title, text);
            }
        }
    }

    let title = extract_title(html).unwrap_or_default();
    let text = html_to_text(html);
    if text.trim().len() >= 40 {
        return (title, text);
    }

    (title, strip_html_tags(html))
}

/// HTML → texto via html2text, com strip de tags quando o retorno é pobre
fn html_to_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 120);
    if text.trim().len() >= 40 {
        text
    } else {
        strip_html_tags(html)
    }
}

/// Remove tags por varredura simples (último recurso)
fn strip_html_tags(html: &str) -> String {
    let mut output = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                output.push(' ');
            }
            _ if !in_tag => output.push(c),
            _ => {}
        }
    }
    output
}

/// Extrai o conteúdo da tag <title>, quando presente
fn extract_title(html: &str) -> Option<String> {
    // ASCII-lowercase preserva os offsets em bytes sobre o HTML original
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title")?;
    let open_end = lower[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    Some(clean_text(html.get(open_end..close)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_tags() {
        let html = "<p>Hello <b>world</b></p>";
        let text = strip_html_tags(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn test_extract_title() {
        let html = "<html><head><TITLE>My Page</TITLE></head><body></body></html>";
        assert_eq!(extract_title(html), Some("My Page".to_string()));
        assert_eq!(extract_title("<html></html>"), None);
    }

    #[test]
    fn test_extract_text_plain_document() {
        let body = "word ".repeat(50);
        let html = format!(
            "<html><head><title>Doc</title></head><body><article><p>{body}</p></article></body></html>"
        );
        let (_title, text) = extract_text(&html, "https://example.com/doc");
        assert!(text.contains("word"));
    }
}
