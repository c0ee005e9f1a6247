//! A lightweight page engine over plain HTTP.
//!
//! Keeps one "tab": the current page, its status and body, plus a back stack.
//! No script execution; text and title are extracted from the raw HTML.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use fleet_runtime::{Engine, EngineError, engine_actions};
use regex_lite::Regex;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::config::HttpConfig;

engine_actions! {
	#[derive(Debug, Clone, PartialEq)]
	pub enum PageAction {
		/// Navigates to `url`, resolved against the current page when relative.
		Goto => "goto" { url: String },
		Reload => "reload" {},
		Back => "back" {},
		Url => "url" {},
		Title => "title" {},
		Text => "text" {},
		Html => "html" {},
		Status => "status" {},
		/// Whether the page's visible text contains `needle`.
		Contains => "contains" { needle: String },
	}
}

#[derive(Debug, Clone)]
struct Page {
	url: Url,
	status: u16,
	body: String,
}

pub struct HttpEngine {
	config: HttpConfig,
	client: Option<reqwest::Client>,
	page: Option<Page>,
	history: Vec<Url>,
}

impl HttpEngine {
	fn client(&self) -> Result<&reqwest::Client, EngineError> {
		self.client.as_ref().ok_or(EngineError::NotRunning)
	}

	fn page(&self) -> Result<&Page, EngineError> {
		self.page
			.as_ref()
			.ok_or_else(|| EngineError::Action("no page loaded; call goto first".into()))
	}

	fn resolve(&self, target: &str) -> Result<Url, EngineError> {
		match Url::parse(target) {
			Ok(url) => Ok(url),
			Err(url::ParseError::RelativeUrlWithoutBase) => {
				let base = self.page.as_ref().map(|page| &page.url).ok_or_else(|| {
					EngineError::Action(format!("relative URL '{target}' needs a loaded page"))
				})?;
				base.join(target)
					.map_err(|e| EngineError::Action(format!("failed to join '{target}' with '{base}': {e}")))
			}
			Err(e) => Err(EngineError::Action(format!("invalid URL '{target}': {e}"))),
		}
	}

	async fn load(&mut self, url: Url) -> Result<&Page, EngineError> {
		let response = self
			.client()?
			.get(url.clone())
			.send()
			.await
			.map_err(|e| EngineError::Action(format!("request to {url} failed: {e}")))?;
		let status = response.status().as_u16();
		let final_url = response.url().clone();
		let body = response
			.text()
			.await
			.map_err(|e| EngineError::Action(format!("reading {final_url} failed: {e}")))?;
		debug!(target = "fleet.http", url = %final_url, status, bytes = body.len(), "page loaded");

		Ok(&*self.page.insert(Page {
			url: final_url,
			status,
			body,
		}))
	}

	async fn navigate(&mut self, url: Url) -> Result<Value, EngineError> {
		let previous = self.page.as_ref().map(|page| page.url.clone());
		let page = self.load(url).await?;
		let summary = json!({ "url": page.url.as_str(), "status": page.status });
		if let Some(previous) = previous {
			self.history.push(previous);
		}
		Ok(summary)
	}
}

#[async_trait]
impl Engine for HttpEngine {
	type Config = HttpConfig;
	type Action = PageAction;

	fn build(config: &HttpConfig) -> Self {
		Self {
			config: config.clone(),
			client: None,
			page: None,
			history: Vec::new(),
		}
	}

	async fn start(&mut self) -> Result<(), EngineError> {
		let client = reqwest::Client::builder()
			.user_agent(&self.config.user_agent)
			.timeout(Duration::from_millis(self.config.timeout_ms))
			.build()
			.map_err(|e| EngineError::Launch(e.to_string()))?;
		self.client = Some(client);

		if let Some(start_url) = self.config.start_url.clone() {
			let url = Url::parse(&start_url)
				.map_err(|e| EngineError::Launch(format!("invalid start URL '{start_url}': {e}")))?;
			self.load(url)
				.await
				.map_err(|e| EngineError::Launch(e.to_string()))?;
		}
		Ok(())
	}

	async fn stop(&mut self, _graceful: bool) -> Result<(), EngineError> {
		self.client = None;
		self.page = None;
		self.history.clear();
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.client.is_some()
	}

	fn describe(&self) -> String {
		match &self.page {
			Some(page) => format!("http({})", page.url),
			None => "http(blank)".to_string(),
		}
	}

	fn checkpoint(&self) -> Option<String> {
		self.page.as_ref().map(|page| page.url.to_string())
	}

	async fn restore(&mut self, checkpoint: &str) -> Result<(), EngineError> {
		let url = Url::parse(checkpoint).map_err(|e| EngineError::Action(format!("invalid checkpoint: {e}")))?;
		self.load(url).await.map(|_| ())
	}

	async fn execute(&mut self, action: PageAction) -> Result<Value, EngineError> {
		match action {
			PageAction::Goto { url } => {
				let url = self.resolve(&url)?;
				self.navigate(url).await
			}
			PageAction::Reload {} => {
				let url = self.page()?.url.clone();
				let page = self.load(url).await?;
				Ok(json!({ "url": page.url.as_str(), "status": page.status }))
			}
			PageAction::Back {} => {
				let url = self
					.history
					.last()
					.cloned()
					.ok_or_else(|| EngineError::Action("no previous page".into()))?;
				let summary = {
					let page = self.load(url).await?;
					json!({ "url": page.url.as_str(), "status": page.status })
				};
				self.history.pop();
				Ok(summary)
			}
			PageAction::Url {} => Ok(self
				.page
				.as_ref()
				.map_or(Value::Null, |page| json!(page.url.as_str()))),
			PageAction::Title {} => Ok(json!(extract_title(&self.page()?.body))),
			PageAction::Text {} => Ok(json!(html_to_text(&self.page()?.body))),
			PageAction::Html {} => Ok(json!(self.page()?.body)),
			PageAction::Status {} => Ok(json!(self.page()?.status)),
			PageAction::Contains { needle } => Ok(json!(html_to_text(&self.page()?.body).contains(&needle))),
		}
	}
}

fn extract_title(html: &str) -> Option<String> {
	static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
	TITLE_RE
		.captures(html)
		.and_then(|caps| caps.get(1))
		.map(|m| collapse_whitespace(&decode_entities(m.as_str())))
		.filter(|title| !title.is_empty())
}

fn html_to_text(html: &str) -> String {
	static HIDDEN_RE: LazyLock<Regex> =
		LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)>").unwrap());
	static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
	static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

	let visible = HIDDEN_RE.replace_all(html, " ");
	let visible = COMMENT_RE.replace_all(&visible, " ");
	let text = TAG_RE.replace_all(&visible, " ");
	collapse_whitespace(&decode_entities(&text))
}

fn collapse_whitespace(text: &str) -> String {
	text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
	s.replace("&nbsp;", " ")
		.replace("&lt;", "<")
		.replace("&gt;", ">")
		.replace("&quot;", "\"")
		.replace("&#39;", "'")
		.replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
	use fleet_runtime::{Action, ActionCall};
	use serde_json::Map;

	use super::*;

	const PAGE: &str = r#"<html><head><title> Fleet &amp; Co
		</title><style>body { color: red }</style></head>
		<body><h1>Hello</h1><!-- hidden --><script>var x = "<b>no</b>";</script>
		<p>Ships&nbsp;<b>ready</b></p></body></html>"#;

	#[test]
	fn title_is_decoded_and_trimmed() {
		assert_eq!(extract_title(PAGE).as_deref(), Some("Fleet & Co"));
		assert_eq!(extract_title("<html><title>  </title></html>"), None);
	}

	#[test]
	fn text_skips_scripts_styles_and_comments() {
		assert_eq!(html_to_text(PAGE), "Hello Ships ready");
	}

	#[test]
	fn relative_urls_need_a_page() {
		let mut engine = HttpEngine::build(&HttpConfig::default());
		assert!(engine.resolve("/next").is_err());

		engine.page = Some(Page {
			url: Url::parse("https://example.test/a/b").unwrap(),
			status: 200,
			body: String::new(),
		});
		assert_eq!(engine.resolve("c").unwrap().as_str(), "https://example.test/a/c");
		assert_eq!(
			engine.resolve("https://other.test/").unwrap().as_str(),
			"https://other.test/"
		);
	}

	#[tokio::test]
	async fn page_queries_fail_before_goto() {
		let mut engine = HttpEngine::build(&HttpConfig::default());
		engine.start().await.unwrap();

		assert_eq!(engine.execute(PageAction::Url {}).await.unwrap(), Value::Null);
		assert!(engine.execute(PageAction::Title {}).await.is_err());
		assert!(engine.execute(PageAction::Back {}).await.is_err());
		assert_eq!(engine.checkpoint(), None);

		engine.stop(true).await.unwrap();
		assert!(!engine.is_running());
	}

	#[tokio::test]
	async fn failed_back_keeps_the_history_entry() {
		let mut engine = HttpEngine::build(&HttpConfig::default());
		engine.start().await.unwrap();
		engine.history.push(Url::parse("ftp://example.test/files").unwrap());

		assert!(engine.execute(PageAction::Back {}).await.is_err());
		assert_eq!(engine.history.len(), 1);
		assert!(engine.execute(PageAction::Back {}).await.is_err());
		assert_eq!(engine.history.len(), 1);
	}

	#[test]
	fn catalog_binds_job_kwargs() {
		let mut kwargs = Map::new();
		kwargs.insert("needle".into(), json!("ready"));
		kwargs.insert("session_id".into(), json!("chan-1"));

		let action = PageAction::bind("contains", ActionCall::new(vec![], kwargs)).unwrap();
		assert_eq!(
			action,
			PageAction::Contains {
				needle: "ready".into()
			}
		);
		assert_eq!(PageAction::spec("goto").map(|s| s.params), Some(&["url"][..]));
	}
}
