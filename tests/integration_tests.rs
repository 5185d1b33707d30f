use select::document::Document;
use select::predicate::{Attr, Name};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use website_cloner::{
    clone_website, CloneError, CloneOptions, CloneReport, CloneState, FetchPolicy, LogSink,
    WebsiteMirror,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_raw(body.as_bytes().to_vec(), "text/html; charset=utf-8")
}

fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        page_timeout: Duration::from_secs(5),
        asset_timeout: Duration::from_secs(5),
        asset_attempts: 3,
        retry_backoff: Duration::from_millis(10),
    }
}

fn options(server: &MockServer, root: &Path) -> CloneOptions {
    CloneOptions::new(format!("{}/", server.uri()))
        .output_root(root)
        .policy(fast_policy())
}

fn recorder() -> (Arc<dyn LogSink>, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let sink: Arc<dyn LogSink> = Arc::new(move |line: &str| {
        captured.lock().unwrap().push(line.to_string());
    });
    (sink, lines)
}

async fn run(options: CloneOptions) -> (CloneReport, Vec<String>) {
    let (sink, lines) = recorder();
    let mut mirror = WebsiteMirror::new(options).with_log_sink(sink);
    let report = mirror.mirror_website().await;
    let lines = lines.lock().unwrap().clone();
    (report, lines)
}

fn site_dir(server: &MockServer, root: &Path) -> PathBuf {
    root.join(server.uri().trim_start_matches("http://"))
}

fn read_page(dir: &Path, name: &str) -> Document {
    let html = fs::read_to_string(dir.join(name)).unwrap();
    Document::from(html.as_str())
}

fn attr_of(document: &Document, selector_id: &str, attribute: &str) -> String {
    document
        .find(Attr("id", selector_id))
        .next()
        .and_then(|node| node.attr(attribute))
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_full_site_clone_with_cycle() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><link rel="stylesheet" href="/style.css"></head>
            <body>
              <img id="logo" src="/images/logo.png">
              <a id="about" href="/about#team">About</a>
              <a id="blog" href="blog/post/">Post</a>
            </body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html(
            r#"<html><body><a id="home" href="/">Home</a><a href="/about">Self</a></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blog/post/"))
        .respond_with(html(r#"<html><body><a id="home" href="../../">Home</a></body></html>"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/style.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string("body { color: red; }"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/images/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .expect(1)
        .mount(&server)
        .await;

    let (report, lines) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.pages_saved, 3);
    assert_eq!(report.pages_failed, 0);
    assert_eq!(report.assets_downloaded, 2);
    assert!(report.error.is_none());

    let dir = site_dir(&server, temp_dir.path());
    assert_eq!(report.output_dir.as_deref(), Some(dir.as_path()));
    assert_eq!(
        fs::read_to_string(dir.join("assets/style.css")).unwrap(),
        "body { color: red; }"
    );
    assert_eq!(fs::read(dir.join("assets/logo.png")).unwrap(), vec![0x89, b'P', b'N', b'G']);

    let index = read_page(&dir, "index.html");
    assert_eq!(attr_of(&index, "logo", "src"), "assets/logo.png");
    assert_eq!(attr_of(&index, "about", "href"), "about.html#team");
    assert_eq!(attr_of(&index, "blog", "href"), "blog_post.html");
    let stylesheet = index.find(Name("link")).next().and_then(|n| n.attr("href"));
    assert_eq!(stylesheet, Some("assets/style.css"));

    assert_eq!(attr_of(&read_page(&dir, "about.html"), "home", "href"), "index.html");
    assert_eq!(attr_of(&read_page(&dir, "blog_post.html"), "home", "href"), "index.html");

    let started = format!("🚀 Cloning website: {}/", server.uri());
    assert_eq!(lines.first(), Some(&started));
    assert!(lines.iter().any(|l| l == &format!("📥 Fetching: {}/about", server.uri())));
    assert!(lines.last().unwrap().starts_with("✅"));
}

#[tokio::test]
async fn test_single_page_mode() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body><img src="pic.jpg"><a id="next" href="/next">Next</a></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(html("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pic.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path()).follow_all(false)).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.pages_saved, 1);

    let dir = site_dir(&server, temp_dir.path());
    assert!(dir.join("assets/pic.jpg").exists());
    assert!(!dir.join("next.html").exists());
    // Links are still pointed at where the page would be saved.
    assert_eq!(attr_of(&read_page(&dir, "index.html"), "next", "href"), "next.html");
}

#[tokio::test]
async fn test_shared_asset_downloaded_once() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body>
              <script src="/app.js?v=2"></script>
              <img src="/app.js?v=2">
              <a href="/two.html">2</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two.html"))
        .respond_with(html(
            r#"<html><body><script id="app" src="/app.js?v=2"></script></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("console.log(1)"))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.assets_downloaded, 1);
    assert_eq!(report.assets_reused, 1);

    let dir = site_dir(&server, temp_dir.path());
    let local = attr_of(&read_page(&dir, "two.html"), "app", "src");
    assert!(local.starts_with("assets/app_") && local.ends_with(".js"), "{}", local);
    assert_eq!(fs::read_dir(dir.join("assets")).unwrap().count(), 1);
}

#[tokio::test]
async fn test_colliding_basenames_get_distinct_files() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<img id="a" src="/a/logo.png"><img id="b" src="/b/logo.png">"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"first".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"second".to_vec()))
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;
    assert_eq!(report.assets_downloaded, 2);

    let dir = site_dir(&server, temp_dir.path());
    let index = read_page(&dir, "index.html");
    let a = attr_of(&index, "a", "src");
    let b = attr_of(&index, "b", "src");
    assert_eq!(a, "assets/logo.png");
    assert_ne!(a, b);
    assert_eq!(fs::read(dir.join(&a)).unwrap(), b"first");
    assert_eq!(fs::read(dir.join(&b)).unwrap(), b"second");
}

#[tokio::test]
async fn test_failed_asset_is_retried_then_left_remote() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body>
              <img id="broken" src="/broken.png">
              <img id="ok" src="/ok.png">
            </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.png"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let (report, lines) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.assets_failed, 1);
    assert_eq!(report.assets_downloaded, 1);
    assert!(matches!(
        report.failures.as_slice(),
        [CloneError::AssetFetchFailed { url, .. }] if url.ends_with("/broken.png")
    ));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("❌ Failed to download") && l.contains("after 3 attempts")));

    let dir = site_dir(&server, temp_dir.path());
    let index = read_page(&dir, "index.html");
    assert_eq!(attr_of(&index, "broken", "src"), "/broken.png");
    assert_eq!(attr_of(&index, "ok", "src"), "assets/ok.png");
    assert!(!dir.join("assets/broken.png").exists());
    assert!(!dir.join("assets/broken.png.part").exists());
}

#[tokio::test]
async fn test_failed_asset_not_requested_again_on_later_pages() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<img id="icon" src="/broken.png"><a href="/one">1</a><a href="/two">2</a>"#,
        ))
        .mount(&server)
        .await;
    for page in ["/one", "/two"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(html(r#"<img id="icon" src="/broken.png">"#))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/broken.png"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.pages_saved, 3);
    assert_eq!(report.assets_failed, 1);
    assert_eq!(report.failures.len(), 1);

    let dir = site_dir(&server, temp_dir.path());
    for page in ["index.html", "one.html", "two.html"] {
        assert_eq!(attr_of(&read_page(&dir, page), "icon", "src"), "/broken.png");
    }
}

#[tokio::test]
async fn test_meta_content_asset_is_localized() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head>
              <meta id="config" name="msapplication-config" content="/browserconfig.xml">
              <meta id="desc" name="description" content="/not/an/asset">
            </head><body></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/browserconfig.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<browserconfig/>"))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;
    assert_eq!(report.assets_downloaded, 1);

    let dir = site_dir(&server, temp_dir.path());
    let index = read_page(&dir, "index.html");
    assert_eq!(attr_of(&index, "config", "content"), "assets/browserconfig.xml");
    assert_eq!(attr_of(&index, "desc", "content"), "/not/an/asset");
    assert_eq!(
        fs::read_to_string(dir.join("assets/browserconfig.xml")).unwrap(),
        "<browserconfig/>"
    );
}

#[tokio::test]
async fn test_missing_page_is_skipped() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/gone">Gone</a><a href="/here">Here</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/here"))
        .respond_with(html("<p>here</p>"))
        .expect(1)
        .mount(&server)
        .await;

    let (report, lines) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.pages_saved, 2);
    assert_eq!(report.pages_failed, 1);
    assert!(lines.iter().any(|l| l.starts_with("❌ Skipping") && l.contains("/gone")));

    let dir = site_dir(&server, temp_dir.path());
    assert!(dir.join("here.html").exists());
    assert!(!dir.join("gone.html").exists());
}

#[tokio::test]
async fn test_pseudo_and_external_urls_untouched() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r##"<html><body>
              <a id="mail" href="mailto:someone@example.com">Mail</a>
              <a id="js" href="javascript:void(0)">JS</a>
              <a id="top" href="#top">Top</a>
              <a id="out" href="https://elsewhere.invalid/page">Out</a>
              <img id="inline" src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">
            </body></html>"##,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert_eq!(report.pages_saved, 1);
    assert_eq!(report.assets_downloaded + report.assets_failed, 0);

    let index = read_page(&site_dir(&server, temp_dir.path()), "index.html");
    assert_eq!(attr_of(&index, "mail", "href"), "mailto:someone@example.com");
    assert_eq!(attr_of(&index, "js", "href"), "javascript:void(0)");
    assert_eq!(attr_of(&index, "top", "href"), "#top");
    assert_eq!(attr_of(&index, "out", "href"), "https://elsewhere.invalid/page");
    assert_eq!(attr_of(&index, "inline", "src"), "data:image/gif;base64,R0lGODlhAQABAAAAACw=");
}

#[tokio::test]
async fn test_redirected_page_resolves_against_final_url() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/old">Old</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new/"))
        .respond_with(html(r#"<img id="pic" src="pic.png">"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new/pic.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;
    assert_eq!(report.pages_saved, 2);

    let dir = site_dir(&server, temp_dir.path());
    assert_eq!(attr_of(&read_page(&dir, "old.html"), "pic", "src"), "assets/pic.png");
}

#[tokio::test]
async fn test_non_html_page_is_parsed_with_warning() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain text"))
        .mount(&server)
        .await;

    let (report, lines) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Completed);
    assert!(lines.iter().any(|l| l.starts_with("⚠️") && l.contains("text/plain")));
    let saved = fs::read_to_string(site_dir(&server, temp_dir.path()).join("index.html")).unwrap();
    assert!(saved.contains("plain text"));
}

#[tokio::test]
async fn test_unreachable_seed_writes_nothing() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(options(&server, temp_dir.path())).await;

    assert_eq!(report.state, CloneState::Failed);
    assert!(report.output_dir.is_none());
    assert!(matches!(report.error, Some(CloneError::SeedUnreachable { .. })));
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancel_removes_partial_output() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<img src="/a.png"><a href="/next">Next</a>"#))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(html("<p>next</p>"))
        .expect(0)
        .mount(&server)
        .await;

    let mirror = WebsiteMirror::new(options(&server, temp_dir.path()));
    let cancel = mirror.cancel_token();
    let sink: Arc<dyn LogSink> = Arc::new(move |line: &str| {
        if line.starts_with("💾 Saved") {
            cancel.cancel();
        }
    });

    let report = mirror.with_log_sink(sink).spawn().wait().await;

    assert_eq!(report.state, CloneState::Cancelled);
    assert_eq!(report.error, Some(CloneError::CancelledByUser));
    assert!(report.output_dir.is_none());
    assert!(!site_dir(&server, temp_dir.path()).exists());
}

#[tokio::test]
async fn test_cancel_with_failing_cleanup_still_ends_cancelled() {
    let server = MockServer::start().await;
    let temp_dir = tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/next">Next</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/next"))
        .respond_with(html("<p>next</p>"))
        .expect(0)
        .mount(&server)
        .await;

    // Swapping the output directory for a plain file makes the rollback fail.
    let dir = site_dir(&server, temp_dir.path());
    let blocked = dir.clone();
    let mirror = WebsiteMirror::new(options(&server, temp_dir.path()));
    let cancel = mirror.cancel_token();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = lines.clone();
    let sink: Arc<dyn LogSink> = Arc::new(move |line: &str| {
        if line.starts_with("💾 Saved") {
            fs::remove_dir_all(&blocked).unwrap();
            fs::write(&blocked, b"in the way").unwrap();
            cancel.cancel();
        }
        captured.lock().unwrap().push(line.to_string());
    });

    let report = mirror.with_log_sink(sink).spawn().wait().await;

    assert_eq!(report.state, CloneState::Cancelled);
    assert_eq!(report.error, Some(CloneError::CancelledByUser));
    assert!(report.output_dir.is_none());
    assert!(lines.lock().unwrap().iter().any(|l| l.starts_with("❌ Cleanup failed")));
    assert!(dir.is_file());
}

#[tokio::test]
async fn test_clone_website_returns_none_when_unreachable() {
    let (sink, lines) = recorder();
    let result = clone_website("http://127.0.0.1:1/", Some(sink), true, None).await;

    assert!(result.is_none());
    assert!(lines.lock().unwrap().iter().any(|l| l.starts_with("❌ Could not reach")));
    assert!(!Path::new("127.0.0.1:1").exists());
}
