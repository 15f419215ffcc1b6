// CLI commands that talk to the Recode API
use anyhow::{bail, Context, Result};
use recode_common::types::{Envelope, TranslateMethod, TranslateRequest};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound for one call; a decompile waits out the whole sandbox lifecycle
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub struct ApiClient {
    http: Client,
    server: String,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    /// POST the binary to `/decompile` and return the annotated text
    pub async fn decompile(&self, filename: &str, data: Vec<u8>) -> Result<String> {
        let part = Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let resp = self
            .http
            .post(self.url("/decompile"))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.server))?;
        read_text(resp).await
    }

    pub async fn translate(&self, request: &TranslateRequest) -> Result<String> {
        let resp = self
            .http
            .post(self.url("/translate"))
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.server))?;
        read_text(resp).await
    }

    pub async fn health(&self) -> Result<String> {
        let resp = self
            .http
            .get(self.url("/status"))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.server))?;
        read_text(resp).await
    }
}

/// Body of a 2xx response; otherwise the server's envelope message as the error
async fn read_text(resp: Response) -> Result<String> {
    let status = resp.status();
    let body = resp.text().await.context("Failed to read response body")?;
    if status.is_success() {
        return Ok(body);
    }

    match serde_json::from_str::<Envelope>(&body) {
        Ok(Envelope {
            message,
            error: Some(detail),
            ..
        }) => bail!("{} ({}): {}", message, status, detail),
        Ok(Envelope { message, .. }) => bail!("{} ({})", message, status),
        Err(_) => bail!("Server returned {}: {}", status, body),
    }
}

fn write_output(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("✅ Saved to {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// Upload a binary and print (or save) the annotated decompilation
pub async fn decompile(client: &ApiClient, file: &Path, out: Option<&Path>) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file name: {}", file.display()))?;
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    eprintln!("🚀 Uploading {} ({} bytes)...", filename, data.len());
    eprintln!("⏳ Decompiling, this can take several minutes");
    let text = client.decompile(filename, data).await?;
    write_output(&text, out)
}

/// Translate or recode the pseudo-code in `file`
pub async fn rework(
    client: &ApiClient,
    file: &Path,
    method: TranslateMethod,
    lang: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let pseudo_code =
        fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if pseudo_code.trim().is_empty() {
        bail!("{} is empty", file.display());
    }

    let request = TranslateRequest {
        pseudo_code,
        method: method.to_string(),
        lang: lang.unwrap_or_default().to_string(),
    };

    match lang {
        Some(lang) => eprintln!("📝 Translating {} into {}...", file.display(), lang),
        None => eprintln!("📝 Recoding {}...", file.display()),
    }
    let text = client.translate(&request).await?;
    write_output(&text, out)
}

pub async fn health(client: &ApiClient) -> Result<()> {
    let text = client.health().await?;
    println!("✅ {} is up: {}", client.server, text.trim());
    Ok(())
}
