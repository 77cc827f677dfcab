//! Unit tests for the yt-dlp backend's output handling

use media_ingest::assets::AssetLayout;
use media_ingest::catalog::ytdlp::CommandOutput;
use media_ingest::catalog::{CatalogConfig, FailureKind, YtDlpBackend};
use media_ingest::proxy::ProxyHandle;
use tempfile::TempDir;

use crate::support::{id, record};

fn backend() -> YtDlpBackend {
    YtDlpBackend::new(&CatalogConfig::new("data"))
}

fn output(success: bool, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        success,
        status: if success { "exit status: 0" } else { "exit status: 1" }.to_string(),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

const SEARCH_OUTPUT: &str = concat!(
    r#"{"_type": "url", "ie_key": "Youtube", "id": "dQw4w9WgXcQ", "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "title": "Ashley got a new car", "description": null, "duration": 212.0, "channel": "Someone", "thumbnails": [{"url": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg", "height": 360, "width": 480}]}"#,
    "\n",
    r#"{"_type": "url", "ie_key": "Youtube", "id": "9bZkp7q19f0", "url": "https://www.youtube.com/watch?v=9bZkp7q19f0", "title": "Ashley got tickets", "duration": null}"#,
    "\n",
);

#[test]
fn test_search_output_becomes_records() {
    let records = backend()
        .interpret_search(&output(true, SEARCH_OUTPUT, ""))
        .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, id("dQw4w9WgXcQ"));
    assert_eq!(records[0].title, "Ashley got a new car");
    assert_eq!(records[0].duration_seconds, Some(212));
    assert_eq!(records[0].description, None);
    assert!(records[0].thumbnail_url.is_some());
    assert_eq!(records[1].duration_seconds, None);
    assert!(records.iter().all(|r| !r.is_materialized()));
}

#[test]
fn test_empty_search_is_not_an_error() {
    assert!(backend()
        .interpret_search(&output(true, "", ""))
        .unwrap()
        .is_empty());
}

#[test]
fn test_unparsable_search_output_is_malformed() {
    let err = backend()
        .interpret_search(&output(true, "<html>blocked</html>\n", ""))
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Malformed);
}

#[test]
fn test_failed_search_is_classified_from_stderr() {
    let err = backend()
        .interpret_search(&output(
            false,
            "",
            "ERROR: [youtube:search] Unable to download API page: HTTP Error 429: Too Many Requests\n",
        ))
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::RateLimited);
    assert!(err.message.contains("429"));
}

#[test]
fn test_failed_search_keeps_partial_results() {
    let records = backend()
        .interpret_search(&output(false, SEARCH_OUTPUT, "ERROR: interrupted"))
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn test_search_args_route_through_the_proxy() {
    let proxy = ProxyHandle::parse("10.0.0.1:8080").unwrap();
    let args = backend().search_args("ashley got", 5, Some(&proxy));
    let args: Vec<String> = args
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    assert!(args.windows(2).any(|w| w == ["--proxy", "http://10.0.0.1:8080"]));
    assert_eq!(args.last().map(String::as_str), Some("ytsearch5:ashley got"));
}

#[test]
fn test_fetch_args_pin_the_output_location() {
    let layout = AssetLayout::new("data");
    let rec = record("abc123");
    let args: Vec<String> = backend()
        .fetch_args(&rec, &layout.output_template(&rec.id), None)
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let template = layout.output_template(&rec.id).to_string_lossy().into_owned();
    assert!(args.windows(2).any(|w| w[0] == "-o" && w[1] == template));
    assert!(!args.iter().any(|a| a == "--proxy"));
    assert_eq!(args.last(), Some(&rec.source_url));
}

#[test]
fn test_fetch_resolves_the_printed_path() {
    let dir = TempDir::new().unwrap();
    let layout = AssetLayout::new(dir.path());
    let rec = record("abc123");
    layout.prepare(&rec.id).unwrap();
    let media = layout.item_file(&rec.id, "webm");
    let thumb = layout.item_file(&rec.id, "jpg");
    std::fs::write(&media, b"video").unwrap();
    std::fs::write(&thumb, b"thumb").unwrap();

    let stdout = format!("{}\n", media.display());
    let asset = backend()
        .interpret_fetch(&rec, &layout, &output(true, &stdout, ""))
        .unwrap();
    assert_eq!(asset.media_path, media);
    assert_eq!(asset.thumbnail_path, Some(thumb));
}

#[test]
fn test_fetch_without_asset_is_missing_asset() {
    let dir = TempDir::new().unwrap();
    let layout = AssetLayout::new(dir.path());
    let rec = record("abc123");
    layout.prepare(&rec.id).unwrap();

    let err = backend()
        .interpret_fetch(&rec, &layout, &output(true, "", ""))
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::MissingAsset);
}

#[test]
fn test_failed_fetch_is_classified_from_stderr() {
    let dir = TempDir::new().unwrap();
    let layout = AssetLayout::new(dir.path());
    let err = backend()
        .interpret_fetch(
            &record("abc123"),
            &layout,
            &output(false, "", "ERROR: [youtube] abc123: Video unavailable\n"),
        )
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Unavailable);
}
