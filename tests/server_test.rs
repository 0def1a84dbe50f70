// Integration test for the stream endpoint.

mod common;

use std::time::Duration;

use reqwest::{header, StatusCode};
use tokio::time::timeout;

use common::{eventually, payload, Harness, HASH_A, HASH_B, UNKNOWN_HASH, VIDEO_SIZE};
use ma_torrent_engine::transfer::traits::Priority;

async fn video_url(h: &Harness) -> String {
    let id = h.with_movie().await;
    h.session.stream_url(&id, 0).await.unwrap()
}

async fn get_range(url: &str, range: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .header(header::RANGE, range)
        .send()
        .await
        .unwrap()
}

fn header_str<'a>(resp: &'a reqwest::Response, name: header::HeaderName) -> &'a str {
    resp.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_full_file_without_range() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;

    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header_str(&resp, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(header_str(&resp, header::ACCEPT_RANGES), "bytes");
    assert_eq!(
        header_str(&resp, header::CONTENT_LENGTH),
        VIDEO_SIZE.to_string()
    );
    assert!(resp.headers().get(header::CONTENT_RANGE).is_none());

    let body = resp.bytes().await.unwrap();
    assert_eq!(body.as_ref(), payload(VIDEO_SIZE, 0).as_slice());
}

#[tokio::test]
async fn test_bounded_ranges_return_exact_bytes() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    let content = payload(VIDEO_SIZE, 0);
    let last = VIDEO_SIZE - 1;

    for (start, end) in [(0, 1023), (1000, 1999), (65_530, 200_000), (last, last)] {
        let resp = get_range(&url, &format!("bytes={}-{}", start, end)).await;
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            header_str(&resp, header::CONTENT_RANGE),
            format!("bytes {}-{}/{}", start, end, VIDEO_SIZE)
        );
        assert_eq!(
            header_str(&resp, header::CONTENT_LENGTH),
            (end - start + 1).to_string()
        );
        let body = resp.bytes().await.unwrap();
        assert_eq!(body.as_ref(), &content[start..=end], "range {}-{}", start, end);
    }
}

#[tokio::test]
async fn test_open_ended_and_oversized_ranges_run_to_end() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    let content = payload(VIDEO_SIZE, 0);
    let last = VIDEO_SIZE - 1;

    let resp = get_range(&url, "bytes=1048000-").await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&resp, header::CONTENT_RANGE),
        format!("bytes 1048000-{}/{}", last, VIDEO_SIZE)
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), &content[1_048_000..]);

    let resp = get_range(&url, "bytes=10-999999999").await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&resp, header::CONTENT_RANGE),
        format!("bytes 10-{}/{}", last, VIDEO_SIZE)
    );
    assert_eq!(resp.bytes().await.unwrap().len(), VIDEO_SIZE - 10);
}

#[tokio::test]
async fn test_suffix_range_serves_tail() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    let content = payload(VIDEO_SIZE, 0);

    let resp = get_range(&url, "bytes=-500").await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&resp, header::CONTENT_RANGE),
        format!("bytes {}-{}/{}", VIDEO_SIZE - 500, VIDEO_SIZE - 1, VIDEO_SIZE)
    );
    assert_eq!(
        resp.bytes().await.unwrap().as_ref(),
        &content[VIDEO_SIZE - 500..]
    );
}

#[tokio::test]
async fn test_unusable_range_falls_back_to_full_content() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;

    for range in ["bytes=abc-def", "items=0-10", &format!("bytes={}-", VIDEO_SIZE)] {
        let resp = get_range(&url, range).await;
        assert_eq!(resp.status(), StatusCode::OK, "range {:?}", range);
        assert_eq!(resp.bytes().await.unwrap().len(), VIDEO_SIZE);
    }
}

#[tokio::test]
async fn test_subtitle_content_type() {
    let h = Harness::new(common::test_config());
    let id = h.with_movie().await;
    let url = h.session.stream_url(&id, 1).await.unwrap();

    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header_str(&resp, header::CONTENT_TYPE), "application/x-subrip");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), payload(300, 7).as_slice());
}

#[tokio::test]
async fn test_request_errors() {
    let h = Harness::new(common::test_config());
    h.with_movie().await;
    let port = h.session.port().await.unwrap();
    let base = format!("http://127.0.0.1:{}/stream", port);

    let cases = [
        (format!("{}?file=0", base), StatusCode::BAD_REQUEST),
        (format!("{}?hash={}", base, HASH_A), StatusCode::BAD_REQUEST),
        (format!("{}?hash=&file=", base), StatusCode::BAD_REQUEST),
        (
            format!("{}?hash={}&file=0", base, UNKNOWN_HASH),
            StatusCode::NOT_FOUND,
        ),
        (
            format!("{}?hash={}&file=abc", base, HASH_A),
            StatusCode::BAD_REQUEST,
        ),
    ];
    for (url, expected) in cases {
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), expected, "{}", url);
    }

    for index in ["2", "-1"] {
        let resp = reqwest::get(format!("{}?hash={}&file={}", base, HASH_A, index))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.text().await.unwrap(), "File index out of range (0-1)");
    }
}

#[tokio::test]
async fn test_identifier_is_case_insensitive() {
    let h = Harness::new(common::test_config());
    h.with_movie().await;
    let port = h.session.port().await.unwrap();

    let url = format!(
        "http://127.0.0.1:{}/stream?hash={}&file=1",
        port,
        HASH_A.to_uppercase()
    );
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_streaming_raises_priority_and_releases_reader() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    assert_eq!(h.movie.priority(0), Some(Priority::Normal));

    let resp = get_range(&url, "bytes=0-99").await;
    assert_eq!(resp.bytes().await.unwrap().len(), 100);

    assert_eq!(h.movie.priority(0), Some(Priority::High));
    assert_eq!(h.movie.priority(1), Some(Priority::Normal));
    assert!(eventually(|| h.movie.open_readers() == 0).await);
}

#[tokio::test]
async fn test_client_disconnect_releases_reader() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;

    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // Headers are in, the body is still being produced.
    drop(resp);

    assert!(eventually(|| h.movie.open_readers() == 0).await);
}

#[tokio::test]
async fn test_failed_first_read_is_server_error() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    h.movie.fail_reads_at(1000);

    let resp = get_range(&url, "bytes=2000-2999").await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(eventually(|| h.movie.open_readers() == 0).await);

    h.movie.fail_reads_at(0);
    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_read_failure_mid_body_truncates_response() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    let content = payload(VIDEO_SIZE, 0);
    let cut = 128 * 1024;
    h.movie.fail_reads_at(cut as u64);

    let mut resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        header_str(&resp, header::CONTENT_LENGTH),
        VIDEO_SIZE.to_string()
    );

    let mut received = Vec::new();
    let outcome = loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => received.extend_from_slice(&chunk),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    // The connection is cut short of the advertised length.
    assert!(outcome.is_err());
    assert!(received.len() < VIDEO_SIZE);
    assert_eq!(received.as_slice(), &content[..received.len()]);
    assert!(eventually(|| h.movie.open_readers() == 0).await);
}

#[tokio::test]
async fn test_stalled_stream_does_not_block_session() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    let other = h
        .catalog()
        .insert(HASH_B, vec![("other.mp4".into(), payload(10, 3))]);
    h.movie.pause_reads_at(256 * 1024);

    let mut resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.chunk().await.unwrap().is_some());
    assert_eq!(h.movie.open_readers(), 1);

    let limit = Duration::from_secs(1);
    let files = timeout(limit, h.session.list_files(HASH_A)).await.unwrap();
    assert_eq!(files.unwrap().len(), 2);
    let added = timeout(limit, h.session.add_transfer(&other.magnet())).await.unwrap();
    assert_eq!(added.unwrap(), HASH_B);
    let progress = timeout(limit, h.session.progress(HASH_A, 0)).await.unwrap();
    assert!(!progress.unwrap().done);
    let second = timeout(limit, h.session.stream_url(HASH_B, 0)).await.unwrap().unwrap();
    let body = timeout(limit, reqwest::get(&second)).await.unwrap().unwrap();
    assert_eq!(body.bytes().await.unwrap().as_ref(), payload(10, 3).as_slice());

    h.movie.resume_reads();
    let mut total = 0;
    while let Some(chunk) = resp.chunk().await.unwrap() {
        total += chunk.len();
    }
    assert!(total > 0);
    assert!(eventually(|| h.movie.open_readers() == 0).await);
}

#[tokio::test]
async fn test_shutdown_with_stalled_stream_is_bounded() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    h.movie.pause_reads_at(256 * 1024);

    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let status = timeout(Duration::from_secs(5), h.session.shutdown())
        .await
        .unwrap();
    assert_eq!(status, "Torrent client shut down successfully");

    drop(resp);
    h.movie.resume_reads();
    assert!(eventually(|| h.movie.open_readers() == 0).await);
}

#[tokio::test]
async fn test_head_returns_headers_only() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;

    let resp = reqwest::Client::new()
        .head(&url)
        .header(header::RANGE, "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&resp, header::CONTENT_LENGTH), "100");
    assert_eq!(
        header_str(&resp, header::CONTENT_RANGE),
        format!("bytes 100-199/{}", VIDEO_SIZE)
    );
    assert!(resp.bytes().await.unwrap().is_empty());
    assert_eq!(h.movie.open_readers(), 0);
}

#[tokio::test]
async fn test_empty_file_is_served_empty() {
    let h = Harness::new(common::test_config());
    let empty = h
        .catalog()
        .insert(HASH_B, vec![("empty.mkv".into(), Vec::new())]);
    h.init().await;
    let id = h.session.add_transfer(&empty.magnet()).await.unwrap();
    let url = h.session.stream_url(&id, 0).await.unwrap();

    let resp = reqwest::get(&url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header_str(&resp, header::CONTENT_TYPE), "video/x-matroska");
    assert_eq!(header_str(&resp, header::CONTENT_LENGTH), "0");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_listener_closed_after_shutdown() {
    let h = Harness::new(common::test_config());
    let url = video_url(&h).await;
    assert_eq!(reqwest::get(&url).await.unwrap().status(), StatusCode::OK);

    h.session.shutdown().await;
    assert!(reqwest::get(&url).await.is_err());
}
