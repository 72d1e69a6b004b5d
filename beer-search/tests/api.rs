use std::net::SocketAddr;

use anyhow::Result;
use beer_search::{server, State, StaticFiles};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use hyper::{Body, Client, HeaderMap, Method, Request, StatusCode};
use search_index::{Index, IndexMapping, IndexSettings};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    index: Index,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
    _index_dir: TempDir,
    _static_dir: TempDir,
}

impl TestServer {
    async fn start(etag: Option<&str>) -> Result<Self> {
        let _ = tracing_subscriber::fmt::try_init();

        let index_dir = TempDir::new()?;
        let static_dir = TempDir::new()?;

        tokio::fs::write(static_dir.path().join("index.html"), "<html>beer</html>").await?;
        tokio::fs::create_dir(static_dir.path().join("css")).await?;
        tokio::fs::write(static_dir.path().join("css").join("site.css"), "body {}").await?;

        let settings = IndexSettings {
            reader_threads: 1,
            max_concurrency: 2,
            writer_threads: 1,
            writer_buffer: 0,
        };
        let index = Index::create(
            index_dir.path().join("beer.index"),
            IndexMapping::beer(),
            settings,
        )
        .await?;

        let mut batch = index.new_batch();
        batch.index(
            "21st_amendment_brewery_cafe",
            &json!({
                "name": "21st Amendment Brewery Cafe",
                "type": "brewery",
                "city": "San Francisco",
                "description": "The 21st Amendment Brewery offers a variety of award winning house made brews.",
            }),
        )?;
        batch.index(
            "21st_amendment_brewery_cafe-watermelon_wheat",
            &json!({
                "name": "Watermelon Wheat",
                "type": "beer",
                "abv": 5.5,
                "style": "American-Style Wheat Beer",
                "brewery_id": "21st_amendment_brewery_cafe",
                "description": "Refreshing summer wheat ale brewed with fresh watermelon.",
            }),
        )?;
        batch.index(
            "512_brewing_company-512_pecan_porter",
            &json!({
                "name": "512 Pecan Porter",
                "type": "beer",
                "abv": 6.8,
                "style": "Porter",
                "brewery_id": "512_brewing_company",
                "description": "Nearly black in color, brewed with pecans.",
            }),
        )?;
        index.batch(batch).await?;

        let files = StaticFiles::new(static_dir.path(), etag)?;
        let state = State::new(index.clone(), files, false);

        let (stop, stopped) = oneshot::channel::<()>();
        let addr: SocketAddr = "127.0.0.1:0".parse()?;
        let (addr, serving) = server::bind(state, &addr, async {
            let _ = stopped.await;
        })?;
        let handle = tokio::spawn(serving);

        Ok(Self {
            addr,
            index,
            stop,
            handle,
            _index_dir: index_dir,
            _static_dir: static_dir,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.addr, path));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let req = builder.body(body.map(|b| Body::from(b.to_string())).unwrap_or_default())?;
        let resp = Client::new().request(req).await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = hyper::body::to_bytes(resp.into_body()).await?;

        Ok((status, headers, body))
    }

    async fn json(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let body = body.map(|b| b.to_string());
        let (status, _, data) = self.request(method, path, body.as_deref(), &[]).await?;
        Ok((status, serde_json::from_slice(&data)?))
    }

    async fn shutdown(self) -> Result<()> {
        let _ = self.stop.send(());
        self.handle.await??;
        self.index.shutdown().await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_search() -> Result<()> {
    let server = TestServer::start(None).await?;

    let (status, body) = server
        .json(
            Method::POST,
            "/api/search",
            Some(json!({"query": {"query": "watermelon"}, "fields": ["*"]})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 200);
    assert_eq!(body["data"]["total_hits"], 1);
    assert_eq!(
        body["data"]["hits"][0]["id"],
        "21st_amendment_brewery_cafe-watermelon_wheat"
    );
    assert_eq!(body["data"]["hits"][0]["fields"]["name"], "Watermelon Wheat");

    let (status, body) = server
        .json(
            Method::POST,
            "/api/search",
            Some(json!({
                "query": {"term": "beer", "field": "_type"},
                "order_by": "abv",
                "sort": "desc",
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_hits"], 2);
    assert_eq!(
        body["data"]["hits"][0]["id"],
        "512_brewing_company-512_pecan_porter"
    );

    let (status, body) = server
        .json(
            Method::POST,
            "/api/search",
            Some(json!({"query": {"term": "beer", "field": "type"}})),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_hits"], 2);

    let (status, body) = server
        .json(
            Method::POST,
            "/api/search",
            Some(json!({"query": {"match_all": {}}, "from": 20_000})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    server.shutdown().await
}

#[tokio::test]
async fn test_search_bad_requests() -> Result<()> {
    let server = TestServer::start(None).await?;

    let (status, _, _) = server
        .request(Method::POST, "/api/search", Some("{ not json"), &[])
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .json(
            Method::POST,
            "/api/search",
            Some(json!({"query": {"term": "x", "field": "not_a_field"}})),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);

    let (status, body) = server.json(Method::GET, "/api/search", None).await?;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["status"], 405);

    server.shutdown().await
}

#[tokio::test]
async fn test_fields() -> Result<()> {
    let server = TestServer::start(None).await?;

    let (status, body) = server.json(Method::GET, "/api/fields", None).await?;
    assert_eq!(status, StatusCode::OK);

    let fields: Vec<String> = serde_json::from_value(body["data"]["fields"].clone())?;
    assert!(fields.contains(&"_id".to_string()));
    assert!(fields.contains(&"name".to_string()));
    assert!(fields.contains(&"abv".to_string()));
    assert!(!fields.contains(&"_all".to_string()));

    server.shutdown().await
}

#[tokio::test]
async fn test_debug_document() -> Result<()> {
    let server = TestServer::start(None).await?;

    let (status, body) = server
        .json(
            Method::GET,
            "/api/debug/512_brewing_company-512_pecan_porter",
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "512_brewing_company-512_pecan_porter");
    assert!(body["data"]["terms"].is_object());

    let (status, body) = server
        .json(Method::GET, "/api/debug/no_such_beer", None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    let (status, _) = server
        .json(Method::DELETE, "/api/debug/no_such_beer", None)
        .await?;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    server.shutdown().await
}

#[tokio::test]
async fn test_unknown_api_route() -> Result<()> {
    let server = TestServer::start(None).await?;

    let (status, body) = server.json(Method::GET, "/api/brewers", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    server.shutdown().await
}

#[tokio::test]
async fn test_static_files() -> Result<()> {
    let server = TestServer::start(None).await?;

    let (status, headers, body) = server.request(Method::GET, "/", None, &[]).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(&body[..], b"<html>beer</html>");
    assert!(headers.get(ETAG).is_none());

    let (status, headers, body) = server
        .request(Method::GET, "/css/site.css", None, &[])
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "text/css; charset=utf-8");
    assert_eq!(&body[..], b"body {}");

    let (status, _, body) = server
        .request(Method::GET, "/beers/watermelon_wheat", None, &[])
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"<html>beer</html>");

    let (status, _, _) = server
        .request(Method::GET, "/missing.css", None, &[])
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = server
        .request(Method::GET, "/css/../../secret.txt", None, &[])
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.shutdown().await
}

#[tokio::test]
async fn test_static_etag() -> Result<()> {
    let server = TestServer::start(Some("v1")).await?;

    let (status, headers, _) = server.request(Method::GET, "/", None, &[]).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[ETAG], "\"v1\"");

    let (status, headers, body) = server
        .request(Method::GET, "/css/site.css", None, &[(IF_NONE_MATCH.as_str(), "\"v1\"")])
        .await?;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert_eq!(headers[ETAG], "\"v1\"");
    assert!(body.is_empty());

    let (status, _, _) = server
        .request(Method::GET, "/css/site.css", None, &[(IF_NONE_MATCH.as_str(), "\"v0\"")])
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, headers, _) = server
        .request(Method::GET, "/missing.css", None, &[(IF_NONE_MATCH.as_str(), "\"v1\"")])
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(headers.get(ETAG).is_none());

    server.shutdown().await
}
