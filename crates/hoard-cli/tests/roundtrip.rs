//! Client-against-server round trips over real HTTP on a loopback port.

use std::sync::Arc;

use hoard_client::{ClientAuth, HoardClient};
use hoard_index::Index;
use hoard_kv::{MemoryKv, SortedKv};
use hoard_schema::{ClaimType, Signer};
use hoard_server::{build_router, ServerConfig, ServerState};
use hoard_store::{BlobStore, MemoryStore};
use hoard_types::BlobRef;

async fn spawn_server() -> (HoardClient, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let kv: Arc<dyn SortedKv> = Arc::new(MemoryKv::new());
    let index = Arc::new(Index::open(kv).unwrap());
    index.set_blob_source(Arc::clone(&store) as Arc<dyn BlobStore>);
    index.attach_corpus().unwrap();

    let state = ServerState::new(
        Arc::clone(&store) as Arc<dyn BlobStore>,
        index,
        None,
        ServerConfig::default(),
    );
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = HoardClient::new(format!("http://{addr}"), ClientAuth::None).unwrap();
    (client, store)
}

fn pseudo_random(len: usize) -> Vec<u8> {
    let mut state: u64 = 0xDEADBEEFCAFEF00D;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

#[tokio::test]
async fn upload_enumerate_stat_three_blobs() {
    let (client, _store) = spawn_server().await;
    let mut expected: Vec<String> = Vec::new();
    for content in [&b"a"[..], b"b", b"c"] {
        let result = client.put_blob(content).await.unwrap();
        assert_eq!(result.size, 1);
        expected.push(result.blob_ref.to_string());
    }
    expected.sort();

    let page = client.enumerate("", 100).await.unwrap();
    let got: Vec<String> = page
        .blobs
        .iter()
        .map(|sb| sb.blob_ref.to_string())
        .collect();
    assert_eq!(got, expected);

    let refs: Vec<BlobRef> = expected.iter().map(|s| BlobRef::parse(s).unwrap()).collect();
    let stat = client.stat(&refs).await.unwrap();
    assert_eq!(stat.len(), 3);
    assert!(stat.iter().all(|sb| sb.size == 1));
}

#[tokio::test]
async fn second_upload_short_circuits_via_stat() {
    let (client, _store) = spawn_server().await;
    let first = client.put_blob(b"dedup me").await.unwrap();
    assert_eq!(first.outcome, hoard_client::UploadOutcome::Uploaded);
    let second = client.put_blob(b"dedup me").await.unwrap();
    assert_eq!(second.outcome, hoard_client::UploadOutcome::StatHit);
}

#[tokio::test]
async fn file_roundtrip_through_chunker() {
    let (client, _store) = spawn_server().await;
    let data = pseudo_random(1 << 20);
    let root = client.upload_file("big.bin", &data).await.unwrap();

    let fetched = client.download_file(&root).await.unwrap();
    assert_eq!(fetched, data);

    // Uploading the same contents again moves almost nothing.
    let again = client.upload_file("copy.bin", &data).await.unwrap();
    let fetched_again = client.download_file(&again).await.unwrap();
    assert_eq!(fetched_again, data);
}

#[tokio::test]
async fn claims_flow_reaches_search() {
    let (client, _store) = spawn_server().await;
    let signer = Signer::generate();

    let pn = client.create_permanode(&signer).await.unwrap();
    client
        .upload_attribute_claim(&signer, &pn, ClaimType::SetAttribute, "title", "via http")
        .await
        .unwrap();
    client
        .upload_attribute_claim(&signer, &pn, ClaimType::AddAttribute, "tag", "wire")
        .await
        .unwrap();

    let results = client.search("tag:wire").await.unwrap();
    let blobs = results["blobs"].as_array().unwrap();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0]["blob"], pn.to_string());

    let description = client.describe(&pn, 2).await.unwrap();
    let attr = &description["meta"][&pn.to_string()]["permanode"]["attr"];
    assert_eq!(attr["title"][0], "via http");
    assert_eq!(attr["tag"][0], "wire");
}

#[tokio::test]
async fn delete_claim_hides_permanode() {
    let (client, _store) = spawn_server().await;
    let signer = Signer::generate();
    let pn = client.create_permanode(&signer).await.unwrap();
    client
        .upload_attribute_claim(&signer, &pn, ClaimType::AddAttribute, "tag", "doomed")
        .await
        .unwrap();
    assert_eq!(
        client.search("tag:doomed").await.unwrap()["blobs"]
            .as_array()
            .unwrap()
            .len(),
        1
    );

    client.upload_delete_claim(&signer, &pn).await.unwrap();
    assert!(client.search("tag:doomed").await.unwrap()["blobs"]
        .as_array()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn fetch_verifies_digests() {
    let (client, _store) = spawn_server().await;
    let put = client.put_blob(b"verified end to end").await.unwrap();
    let data = client.fetch(&put.blob_ref).await.unwrap();
    assert_eq!(data, b"verified end to end");

    let missing = BlobRef::sha1_of(b"never uploaded");
    let err = client.fetch(&missing).await.unwrap_err();
    assert!(matches!(
        err,
        hoard_client::ClientError::Status { status: 404, .. }
    ));
}
