//! `toolwright parse`: Show how a model reply is interpreted.

use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use toolwright_agent::{ParsedResponse, ResponseParser};

pub async fn run(file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    tracing::debug!(bytes = text.len(), "Parsing model reply");
    println!("{}", render(&text)?);
    Ok(())
}

pub(crate) fn render(text: &str) -> Result<String, serde_json::Error> {
    let parser = ResponseParser::new();
    let parsed: ParsedResponse = parser.parse(text);
    let output = serde_json::json!({
        "response": parsed,
        "parse_errors": parser.stats().parse_errors,
    });
    serde_json::to_string_pretty(&output)
}
