//! Append Blob protocol against a mock Blob service.

use std::time::Duration;

use homespool::config::RemoteConfig;
use homespool::{FlushEngine, FlushReport, Spool};
use tempfile::tempdir;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTAINER: &str = "homelab-telemetry";
const TARGET: &str = "bronze/proxmox/node_status/node_status_hl2.jsonl";
const BLOB_PATH: &str = "/devstoreaccount1/homelab-telemetry/bronze/proxmox/node_status/node_status_hl2.jsonl";

fn remote_for(server: &MockServer) -> RemoteConfig {
    RemoteConfig {
        connection_string: Some(format!(
            "BlobEndpoint={}/devstoreaccount1;AccountName=devstoreaccount1;AccountKey=c2VjcmV0LWtleQ==",
            server.uri()
        )),
        container: CONTAINER.to_string(),
        timeout: Duration::from_secs(5),
    }
}

async fn mount_container(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/devstoreaccount1/homelab-telemetry"))
        .and(query_param("restype", "container"))
        .respond_with(ResponseTemplate::new(409))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn creates_append_blob_and_appends_each_part() {
    let server = MockServer::start().await;
    mount_container(&server).await;

    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(BLOB_PATH))
        .and(header("x-ms-blob-type", "AppendBlob"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(BLOB_PATH))
        .and(query_param("comp", "appendblock"))
        .and(header_exists("x-ms-date"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let spool = Spool::new(dir.path());
    for n in 0..3 {
        spool.write_line(TARGET, &format!("{{\"n\":{n}}}\n")).unwrap();
    }

    let engine = FlushEngine::from_config(spool.clone(), &remote_for(&server)).unwrap();
    let report = engine.flush(None).await;

    assert_eq!(report, FlushReport { flushed: 3, failed: 0 });
    assert_eq!(spool.pending().unwrap(), 0);
}

#[tokio::test]
async fn block_blob_at_target_is_a_kind_mismatch() {
    let server = MockServer::start().await;
    mount_container(&server).await;

    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("x-ms-blob-type", "BlockBlob"))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let spool = Spool::new(dir.path());
    spool.write_line(TARGET, "{}\n").unwrap();
    spool.write_line(TARGET, "{}\n").unwrap();

    let engine = FlushEngine::from_config(spool.clone(), &remote_for(&server)).unwrap();
    let report = engine.flush(Some(TARGET)).await;

    assert_eq!(report, FlushReport { flushed: 0, failed: 1 });
    assert_eq!(spool.list_parts(TARGET).unwrap().len(), 2);
}

#[tokio::test]
async fn rejected_append_keeps_parts_spooled() {
    let server = MockServer::start().await;
    mount_container(&server).await;

    Mock::given(method("HEAD"))
        .and(path(BLOB_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("x-ms-blob-type", "AppendBlob"))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path(BLOB_PATH))
        .and(query_param("comp", "appendblock"))
        .respond_with(ResponseTemplate::new(503).set_body_string("ServerBusy"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let spool = Spool::new(dir.path());
    spool.write_line(TARGET, "{\"a\":1}\n").unwrap();
    spool.write_line(TARGET, "{\"a\":2}\n").unwrap();

    let engine = FlushEngine::from_config(spool.clone(), &remote_for(&server)).unwrap();
    let report = engine.flush(Some(TARGET)).await;

    assert_eq!(report, FlushReport { flushed: 0, failed: 1 });
    assert_eq!(spool.list_parts(TARGET).unwrap().len(), 2);
}
