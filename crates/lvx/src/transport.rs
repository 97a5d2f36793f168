//! # 📡 THE ELASTICSEARCH TRANSPORT
//!
//! *Previously, on Logvex...*
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! The monitoring dashboard glows amber in the dark. One engineer, alone,
//! stares into the abyss of a RED cluster. The abyss stares back and
//! offers a 429. Our hero's coffee has gone cold. Somewhere in the distance,
//! a PagerDuty alert fires for something completely unrelated, and yet: it hurts.
//!
//! 🚀 This module is the one place that actually speaks HTTP to the indexing
//! backend. Everything above it — the bulk indexer, the lifecycle manager —
//! talks through traits, so the wire can be swapped for an in-process fake
//! without anyone upstairs noticing. That's not flexibility for its own sake;
//! that's how the tests stay honest and the 3am engineer stays employed.
//!
//! Five verbs, the whole vocabulary:
//! - `_bulk`            → ship a batch of documents (NDJSON, the only format ES respects)
//! - `_cat/indices`     → the catalog: what indices exist, how many docs they hold
//! - `DELETE /{index}`  → retire an index (politely, one at a time)
//! - `/{index}/_count`  → count docs in a `[gte, lt)` time range
//! - `_reindex`         → range-copy docs from one index into another
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

/// 📦 What a bulk call came back with, shelled out of the response envelope.
#[derive(Debug, Default)]
pub struct BulkReply {
    /// ⚠️ ES sets this when at least one item in the batch had a bad day.
    pub errors: bool,
    /// 📦 One per-document result, in submission order, inner object extracted
    /// (ES wraps each as `{"index": {...}}` or `{"create": {...}}` depending on
    /// version and mood — we unwrap either).
    pub items: Vec<Value>,
}

/// 🚚 Anything that can carry one bulk payload to the backend.
///
/// The bulk indexer holds a `Box<dyn BulkTransport>` and does not care whether
/// the other end is a real cluster, a wiremock, or a Vec in a trench coat.
#[async_trait]
pub trait BulkTransport: std::fmt::Debug + Send + Sync {
    /// 📡 Ship one NDJSON bulk body. Transport or HTTP-level failure is `Err`;
    /// per-item failures ride back inside the reply.
    async fn bulk(&self, body: String) -> Result<BulkReply>;
}

/// 📇 One row of the index catalog. `docs.count` arrives as a string because
/// the cat API was designed for terminals first and parsers second.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub index: String,
    #[serde(rename = "docs.count", default)]
    docs_count: Option<Value>,
}

impl CatalogEntry {
    /// 🔢 The document count, whatever type the cat API felt like today.
    pub fn doc_count(&self) -> u64 {
        match &self.docs_count {
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            _ => 0,
        }
    }
}

/// 🗂️ The catalog-and-lifecycle side of the backend: list, delete, count, copy.
///
/// Separate from [`BulkTransport`] because the lifecycle manager and the
/// ingestion path share nothing — not even a trait.
#[async_trait]
pub trait CatalogClient: std::fmt::Debug + Send + Sync {
    /// 📇 Fresh catalog query. Callers must not cache this — index existence
    /// is exactly as stale as the moment after you asked.
    async fn catalog(&self) -> Result<Vec<CatalogEntry>>;
    /// 🗑️ Delete one index. `Ok(false)` means the backend answered but did not
    /// acknowledge; `Err` means the call itself went sideways.
    async fn delete_index(&self, name: &str) -> Result<bool>;
    /// 🔢 Count docs whose `time` falls in `[gte, lt)`, dates as `yyyy-MM-dd`.
    async fn count_range(&self, index: &str, gte: &str, lt: &str) -> Result<u64>;
    /// 🔄 Range-copy docs in `[gte, lt)` from `source` into `dest`.
    async fn reindex_range(&self, source: &str, dest: &str, gte: &str, lt: &str) -> Result<()>;
}

/// 📡 The real deal: reqwest against an Elasticsearch-compatible HTTP endpoint.
///
/// Timeouts are opinionated (10s connect, 30s request) because if the cluster
/// can't handshake in 10 seconds it's not having a good time and neither are we.
#[derive(Debug, Clone)]
pub struct EsTransport {
    client: reqwest::Client,
    base_url: String,
}

impl EsTransport {
    /// 🚀 Build a transport for the given base URL (`http://host:port`).
    ///
    /// No connectivity check here — a log shipper routinely starts before its
    /// cluster does, and refusing to boot would punish the file and console
    /// sinks for the network's sins. Call [`EsTransport::ping`] if you want a
    /// loud early answer.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context(
                "💀 The HTTP client refused to be born. Probably a missing TLS cert or a \
                 cursed system OpenSSL. Either way: tragic.",
            )?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    /// 📡 Convenience for config-shaped callers.
    pub fn for_host(host: &str, port: u16) -> Result<Self> {
        Self::new(format!("http://{host}:{port}"))
    }

    /// 👋 GET the root URL to confirm something Elasticsearch-shaped answers.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .context("💀 Reached out to say hello. Got ghosted. Check the cluster, then the firewall, then your feelings.")?;
        if !response.status().is_success() {
            bail!("💀 Cluster answered the ping with {} — alive, but not happy.", response.status());
        }
        debug!("✅ cluster at {} is up and accepting visitors", self.base_url);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// 📅 The range clause both `_count` and `_reindex` share — inclusive
    /// lower, exclusive upper, explicit date format. `[gte, lt)` or bust.
    fn time_range_query(gte: &str, lt: &str) -> Value {
        json!({
            "query": {
                "range": {
                    "time": {
                        "gte": gte,
                        "lt": lt,
                        "format": "yyyy-MM-dd"
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BulkTransport for EsTransport {
    async fn bulk(&self, body: String) -> Result<BulkReply> {
        let response = self
            .client
            .post(self.url("_bulk"))
            // ⚠️ application/x-ndjson, not application/json. ES will 406 or silently
            // misbehave without this header. The x- prefix means "we made this up
            // but we're committing to it." Classic.
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context(
                "💀 The bulk request never made it to the cluster. We launched the payload \
                 into the network and the network responded with what can only be described \
                 as 'not vibing with it.'",
            )?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 💀 We got a response! It just... wasn't good news.
            bail!(
                "💀 The bulk request arrived, but the cluster looked at our documents and \
                 said '{status}'. The body of the response read: '{body}'."
            );
        }

        #[derive(Deserialize)]
        struct RawBulkResponse {
            #[serde(default)]
            errors: bool,
            #[serde(default)]
            items: Vec<Value>,
        }
        let raw: RawBulkResponse = response
            .json()
            .await
            .context("💀 Bulk response was 2xx but not JSON. The cluster is speaking in tongues.")?;

        // 📦 unwrap {"index": {...}} / {"create": {...}} — which one you get
        // depends on the ES version, like so much else in life
        let items = raw
            .items
            .into_iter()
            .map(|item| {
                item.get("index")
                    .or_else(|| item.get("create"))
                    .cloned()
                    .unwrap_or(item)
            })
            .collect();
        trace!("🚀 bulk request landed — documents have left the building, Elvis-style");
        Ok(BulkReply { errors: raw.errors, items })
    }
}

#[async_trait]
impl CatalogClient for EsTransport {
    async fn catalog(&self) -> Result<Vec<CatalogEntry>> {
        let response = self
            .client
            .get(self.url("_cat/indices?format=json"))
            .send()
            .await
            .context("💀 Catalog query failed to even leave the building.")?;
        let status = response.status();
        if !status.is_success() {
            bail!("💀 Catalog query came back {status}. The cluster is keeping its indices to itself.");
        }
        response
            .json()
            .await
            .context("💀 The catalog response would not parse. _cat has opinions about JSON, apparently.")
    }

    async fn delete_index(&self, name: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(name))
            .send()
            .await
            .context(format!("💀 DELETE for index '{name}' never got an answer."))?;
        let status = response.status();
        if !status.is_success() {
            bail!("💀 Deleting index '{name}' came back {status}. It lives on, for now.");
        }

        #[derive(Deserialize)]
        struct DeleteResponse {
            #[serde(default)]
            acknowledged: bool,
        }
        let parsed: DeleteResponse = response
            .json()
            .await
            .context("💀 Delete response was 2xx but unreadable.")?;
        Ok(parsed.acknowledged)
    }

    async fn count_range(&self, index: &str, gte: &str, lt: &str) -> Result<u64> {
        let response = self
            .client
            .post(self.url(&format!("{index}/_count")))
            .json(&Self::time_range_query(gte, lt))
            .send()
            .await
            .context(format!("💀 Count query for '{index}' [{gte}, {lt}) got lost in transit."))?;
        let status = response.status();
        if !status.is_success() {
            bail!("💀 Count query for '{index}' came back {status}.");
        }

        #[derive(Deserialize)]
        struct CountResponse {
            count: u64,
        }
        let parsed: CountResponse = response
            .json()
            .await
            .context("💀 Count response had no count. One job.")?;
        Ok(parsed.count)
    }

    async fn reindex_range(&self, source: &str, dest: &str, gte: &str, lt: &str) -> Result<()> {
        let body = json!({
            "source": {
                "index": source,
                "query": Self::time_range_query(gte, lt)["query"]
            },
            "dest": {
                "index": dest
            }
        });
        let response = self
            .client
            .post(self.url("_reindex"))
            .json(&body)
            .send()
            .await
            .context(format!("💀 Reindex '{source}' → '{dest}' never got an answer."))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("💀 Reindex '{source}' → '{dest}' came back {status}: {text}");
        }
        debug!("🔄 reindexed '{source}' [{gte}, {lt}) into '{dest}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn the_one_where_bulk_items_get_unwrapped_whatever_the_es_version() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": false,
                "items": [
                    {"index": {"_index": "logs.2023-03-01", "status": 201}},
                    {"create": {"_index": "logs.2023-03-01", "status": 201}}
                ]
            })))
            .mount(&server)
            .await;

        let transport = EsTransport::new(server.uri())?;
        let reply = transport.bulk("{}\n{}\n".to_string()).await?;

        assert!(!reply.errors);
        assert_eq!(reply.items.len(), 2);
        // 🧪 both wrapper spellings collapse to the inner result object
        assert_eq!(reply.items[0]["status"], 201);
        assert_eq!(reply.items[1]["status"], 201);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_500_becomes_a_real_error_with_the_body_attached() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(503).set_body_string("shard panic"))
            .mount(&server)
            .await;

        let transport = EsTransport::new(server.uri())?;
        let err = transport.bulk("{}\n".to_string()).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("503"));
        assert!(msg.contains("shard panic"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_catalog_survives_stringly_typed_counts() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_cat/indices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"index": "logs.2023-01-01", "docs.count": "40"},
                {"index": "logs.2023-02-10", "docs.count": 5},
                {"index": "kibana_internal"}
            ])))
            .mount(&server)
            .await;

        let transport = EsTransport::new(server.uri())?;
        let catalog = transport.catalog().await?;
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0].doc_count(), 40, "string counts parse");
        assert_eq!(catalog[1].doc_count(), 5, "numeric counts pass through");
        assert_eq!(catalog[2].doc_count(), 0, "missing counts default to zero");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_count_sends_the_sacred_range_query() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/_count"))
            .and(body_json(json!({
                "query": {"range": {"time": {"gte": "2023-03-01", "lt": "2023-03-02", "format": "yyyy-MM-dd"}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 1234})))
            .mount(&server)
            .await;

        let transport = EsTransport::new(server.uri())?;
        assert_eq!(transport.count_range("logs", "2023-03-01", "2023-03-02").await?, 1234);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_reindex_carries_source_query_and_dest() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_reindex"))
            .and(body_json(json!({
                "source": {
                    "index": "logs",
                    "query": {"range": {"time": {"gte": "2023-03-01", "lt": "2023-03-02", "format": "yyyy-MM-dd"}}}
                },
                "dest": {"index": "logs.2023-03-01"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"took": 7})))
            .mount(&server)
            .await;

        let transport = EsTransport::new(server.uri())?;
        transport
            .reindex_range("logs", "logs.2023-03-01", "2023-03-01", "2023-03-02")
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_delete_reports_acknowledgement_honestly() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/logs.2023-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/logs.gone-already"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "index_not_found"})))
            .mount(&server)
            .await;

        let transport = EsTransport::new(server.uri())?;
        assert!(transport.delete_index("logs.2023-01-01").await?);
        assert!(transport.delete_index("logs.gone-already").await.is_err());
        Ok(())
    }
}
