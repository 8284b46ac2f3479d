//! End-to-end ingest scenarios: claim application, recursive deletion,
//! file indexing, dependency retry, and reindex invariance.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use hoard_index::Index;
use hoard_kv::{MemoryKv, SortedKv};
use hoard_schema::{build, ClaimType, Signer};
use hoard_store::{fetch_bytes, receive_bytes, BlobStore, MemoryStore};
use hoard_types::{BlobRef, CancelToken};

struct Fixture {
    store: Arc<MemoryStore>,
    kv: Arc<MemoryKv>,
    index: Index,
    signer: Signer,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let kv = Arc::new(MemoryKv::new());
        let index = Index::open(Arc::clone(&kv) as Arc<dyn SortedKv>).unwrap();
        index.set_blob_source(Arc::clone(&store) as Arc<dyn BlobStore>);
        let signer = Signer::generate();
        let fixture = Self {
            store,
            kv,
            index,
            signer,
        };
        fixture.put(fixture.signer.public_key_blob().as_bytes().to_vec());
        fixture
    }

    /// Store a blob and run it through the indexer, like the server's
    /// upload path does.
    fn put(&self, data: Vec<u8>) -> BlobRef {
        let sb = receive_bytes(self.store.as_ref(), &data).unwrap();
        self.index
            .receive_blob(&sb.blob_ref, &mut std::io::Cursor::new(&data))
            .unwrap();
        sb.blob_ref
    }

    fn put_str(&self, s: String) -> BlobRef {
        self.put(s.into_bytes())
    }

    fn new_permanode(&self) -> BlobRef {
        self.put_str(build::permanode().sign(&self.signer).unwrap())
    }

    fn claim(
        &self,
        pn: &BlobRef,
        claim_type: ClaimType,
        attr: &str,
        value: &str,
        date: DateTime<Utc>,
    ) -> BlobRef {
        self.put_str(
            build::attribute_claim(pn, claim_type, attr, value, date)
                .sign(&self.signer)
                .unwrap(),
        )
    }

    fn delete(&self, target: &BlobRef, date: DateTime<Utc>) -> BlobRef {
        self.put_str(build::delete_claim(target, date).sign(&self.signer).unwrap())
    }
}

fn t(s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2013, 6, 1, 12, 0, s).unwrap()
}

#[test]
fn claim_application_set_add_del() {
    let f = Fixture::new();
    let pn = f.new_permanode();

    f.claim(&pn, ClaimType::SetAttribute, "title", "hello", t(1));
    f.claim(&pn, ClaimType::AddAttribute, "tag", "x", t(2));
    f.claim(&pn, ClaimType::AddAttribute, "tag", "y", t(3));
    f.claim(&pn, ClaimType::DelAttribute, "tag", "x", t(4));

    assert_eq!(f.index.attr_values(&pn, "tag", None).unwrap(), vec!["y"]);
    assert_eq!(
        f.index.attr_values(&pn, "title", None).unwrap(),
        vec!["hello"]
    );
    assert_eq!(f.index.permanode_modtime(&pn).unwrap(), Some(t(4)));

    // As-of queries replay only the prefix.
    assert_eq!(
        f.index.attr_values(&pn, "tag", Some(t(3))).unwrap(),
        vec!["x", "y"]
    );
    assert!(f.index.attr_values(&pn, "tag", Some(t(1))).unwrap().is_empty());
}

#[test]
fn set_attribute_replaces_previous_values() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::AddAttribute, "tag", "a", t(1));
    f.claim(&pn, ClaimType::AddAttribute, "tag", "b", t(2));
    f.claim(&pn, ClaimType::SetAttribute, "tag", "only", t(3));
    assert_eq!(f.index.attr_values(&pn, "tag", None).unwrap(), vec!["only"]);
}

#[test]
fn del_attribute_with_empty_value_clears() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::AddAttribute, "tag", "a", t(1));
    f.claim(&pn, ClaimType::AddAttribute, "tag", "b", t(2));
    f.claim(&pn, ClaimType::DelAttribute, "tag", "", t(3));
    assert!(f.index.attr_values(&pn, "tag", None).unwrap().is_empty());
}

#[test]
fn delete_chain_recursion() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::SetAttribute, "title", "victim", t(1));

    let d1 = f.delete(&pn, t(2));
    assert!(f.index.is_deleted(&pn));

    let d2 = f.delete(&d1, t(3));
    assert!(!f.index.is_deleted(&pn), "deleting the delete revives");
    assert!(f.index.is_deleted(&d1));

    f.delete(&d2, t(4));
    assert!(f.index.is_deleted(&pn), "deleting the un-delete re-deletes");
}

#[test]
fn deleted_permanode_leaves_recent_listing() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::SetAttribute, "title", "x", t(1));
    let recent = f.index.recent_permanodes(None, 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].permanode, pn);

    f.delete(&pn, t(2));
    assert!(f.index.recent_permanodes(None, 10).unwrap().is_empty());
}

#[test]
fn unverifiable_claim_emits_no_rows() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    // A claim signed by a key whose blob was never uploaded.
    let stranger = Signer::generate();
    let claim_json = build::attribute_claim(&pn, ClaimType::SetAttribute, "title", "spoof", t(1))
        .sign(&stranger)
        .unwrap();
    let claim_ref = f.put_str(claim_json);

    // The blob itself is accepted and counted...
    assert!(f.kv.get(&format!("have:{claim_ref}")).unwrap().is_some());
    // ...but contributes nothing to the permanode.
    assert!(f.index.attr_values(&pn, "title", None).unwrap().is_empty());
}

#[test]
fn signer_attr_value_lookup() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::SetAttribute, "tag", "blue", t(1));
    let key_id = f.signer.key_id();
    assert_eq!(
        f.index
            .permanode_of_signer_attr_value(&key_id, "tag", "blue")
            .unwrap(),
        Some(pn.clone())
    );
    assert_eq!(
        f.index
            .permanode_of_signer_attr_value(&key_id, "tag", "red")
            .unwrap(),
        None
    );
    assert_eq!(
        f.index
            .search_permanodes_with_attr(&key_id, "tag", "", 10)
            .unwrap(),
        vec![pn]
    );
}

#[test]
fn camli_path_claims_index_both_directions() {
    let f = Fixture::new();
    let root = f.new_permanode();
    let target = f.new_permanode();
    f.claim(
        &root,
        ClaimType::SetAttribute,
        "camliPath:photos",
        &target.to_string(),
        t(1),
    );
    let key_id = f.signer.key_id();

    let paths = f.index.paths_of_signer_target(&key_id, &target).unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].base, root);
    assert_eq!(paths[0].suffix, "photos");

    let looked_up = f
        .index
        .path_lookup(&key_id, &root, "photos", None)
        .unwrap()
        .unwrap();
    assert_eq!(looked_up.target, target);

    // Deleting the path hides it.
    f.claim(
        &root,
        ClaimType::DelAttribute,
        "camliPath:photos",
        &target.to_string(),
        t(2),
    );
    assert!(f
        .index
        .paths_of_signer_target(&key_id, &target)
        .unwrap()
        .is_empty());
}

#[test]
fn member_edges_are_indexed() {
    let f = Fixture::new();
    let parent = f.new_permanode();
    let child = f.new_permanode();
    f.claim(
        &parent,
        ClaimType::AddAttribute,
        "camliMember",
        &child.to_string(),
        t(1),
    );
    let edges = f.index.edges_to(&child, 10).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].from, parent);
    assert_eq!(edges[0].from_type, "permanode");
}

#[test]
fn file_indexing_records_whole_ref() {
    let f = Fixture::new();
    let data: Vec<u8> = (0..3 << 20u32).map(|i| (i * 31 % 251) as u8).collect();
    // The chunker stores chunk + schema blobs directly in the store...
    let root = hoard_schema::write_file_bytes(f.store.as_ref(), "big.bin", &data).unwrap();
    // ...and only the root goes through the indexer here.
    let root_bytes = fetch_bytes(f.store.as_ref(), &root).unwrap();
    f.index
        .receive_blob(&root, &mut std::io::Cursor::new(&root_bytes))
        .unwrap();

    let whole = BlobRef::sha1_of(&data);
    assert_eq!(f.index.existing_file_schemas(&whole).unwrap(), vec![root.clone()]);

    let info = f.index.file_info(&root).unwrap().unwrap();
    assert_eq!(info.size, data.len() as u64);
    assert_eq!(info.file_name, "big.bin");
}

#[test]
fn image_file_gets_dimensions() {
    let f = Fixture::new();
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    png.extend_from_slice(&13u32.to_be_bytes());
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&800u32.to_be_bytes());
    png.extend_from_slice(&600u32.to_be_bytes());
    png.extend_from_slice(&[0u8; 100]);

    let root = hoard_schema::write_file_bytes(f.store.as_ref(), "pic.png", &png).unwrap();
    let root_bytes = fetch_bytes(f.store.as_ref(), &root).unwrap();
    f.index
        .receive_blob(&root, &mut std::io::Cursor::new(&root_bytes))
        .unwrap();

    assert_eq!(f.index.image_size(&root).unwrap(), Some((800, 600)));
    assert!(f.index.file_info(&root).unwrap().unwrap().is_image());
}

#[test]
fn missing_chunk_defers_file_rows_until_retry() {
    let f = Fixture::new();
    let data: Vec<u8> = (0..300 << 10u32).map(|i| (i % 256) as u8).collect();
    let root = hoard_schema::write_file_bytes(f.store.as_ref(), "gap.bin", &data).unwrap();

    // Steal a chunk before the root is indexed.
    let root_bytes = fetch_bytes(f.store.as_ref(), &root).unwrap();
    let sb = hoard_schema::SchemaBlob::parse(&root, &root_bytes).unwrap();
    let parts = sb.parts().unwrap();
    let hoard_schema::PartRef::Blob(stolen) = parts[0].part_ref.clone() else {
        panic!("expected a data chunk");
    };
    let stolen_bytes = fetch_bytes(f.store.as_ref(), &stolen).unwrap();
    f.store.remove(std::slice::from_ref(&stolen)).unwrap();

    f.index
        .receive_blob(&root, &mut std::io::Cursor::new(&root_bytes))
        .unwrap();
    // Base rows landed; file rows did not.
    assert!(f.kv.get(&format!("have:{root}")).unwrap().is_some());
    assert!(f.index.file_info(&root).unwrap().is_none());
    assert_eq!(f.index.missing_blobs(), vec![stolen.clone()]);

    // The chunk arrives: the waiting file is re-indexed automatically.
    f.put(stolen_bytes);
    assert!(f.index.file_info(&root).unwrap().is_some());
    assert!(f.index.missing_blobs().is_empty());
}

#[test]
fn reindex_reproduces_query_results() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::SetAttribute, "title", "kept", t(1));
    f.claim(&pn, ClaimType::AddAttribute, "tag", "a", t(2));
    let doomed = f.new_permanode();
    f.claim(&doomed, ClaimType::SetAttribute, "title", "gone", t(3));
    let d1 = f.delete(&doomed, t(4));
    f.delete(&d1, t(5));
    let d3 = f.delete(&d1, t(6));
    f.delete(&d3, t(7));

    let data: Vec<u8> = (0..200 << 10u32).map(|i| (i % 255) as u8).collect();
    let file_root = hoard_schema::write_file_bytes(f.store.as_ref(), "f.bin", &data).unwrap();
    let root_bytes = fetch_bytes(f.store.as_ref(), &file_root).unwrap();
    f.index
        .receive_blob(&file_root, &mut std::io::Cursor::new(&root_bytes))
        .unwrap();

    let snapshot = |index: &Index| {
        (
            index.attr_values(&pn, "title", None).unwrap(),
            index.attr_values(&pn, "tag", None).unwrap(),
            index.permanode_modtime(&pn).unwrap(),
            index.is_deleted(&doomed),
            index.is_deleted(&d1),
            index
                .existing_file_schemas(&BlobRef::sha1_of(&data))
                .unwrap(),
            index.recent_permanodes(None, 100).unwrap().len(),
        )
    };
    let before = snapshot(&f.index);

    // Index every blob in the store (chunks included) so the reindex has
    // the same population a synced index would.
    for item in f.store.enumerate("", CancelToken::new()).unwrap() {
        let sb = item.unwrap();
        let bytes = fetch_bytes(f.store.as_ref(), &sb.blob_ref).unwrap();
        f.index
            .receive_blob(&sb.blob_ref, &mut std::io::Cursor::new(&bytes))
            .unwrap();
    }

    f.index.reindex(None, CancelToken::new()).unwrap();
    let after = snapshot(&f.index);
    assert_eq!(before, after);
}

#[test]
fn corpus_and_kv_paths_agree() {
    let f = Fixture::new();
    let pn = f.new_permanode();
    f.claim(&pn, ClaimType::SetAttribute, "title", "same", t(1));
    f.claim(&pn, ClaimType::AddAttribute, "tag", "t1", t(2));

    // Queries without a corpus...
    let kv_title = f.index.attr_values(&pn, "title", None).unwrap();
    let kv_recent = f.index.recent_permanodes(None, 10).unwrap();

    // ...and with one, over the same rows.
    f.index.attach_corpus().unwrap();
    assert_eq!(f.index.attr_values(&pn, "title", None).unwrap(), kv_title);
    let corpus_recent = f.index.recent_permanodes(None, 10).unwrap();
    assert_eq!(corpus_recent.len(), kv_recent.len());
    assert_eq!(corpus_recent[0].permanode, kv_recent[0].permanode);
    assert_eq!(corpus_recent[0].mod_time, kv_recent[0].mod_time);
}

#[test]
fn index_acts_as_blob_store_destination() {
    let f = Fixture::new();
    let data = b"sync me".to_vec();
    let br = BlobRef::sha1_of(&data);
    let sized = BlobStore::receive(&f.index, &br, &mut std::io::Cursor::new(&data)).unwrap();
    assert_eq!(sized.size, 7);
    assert_eq!(f.index.stat(std::slice::from_ref(&br)).unwrap().len(), 1);
    let enumerated: Vec<_> = f
        .index
        .enumerate("", CancelToken::new())
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert!(enumerated.iter().any(|sb| sb.blob_ref == br));
    assert!(BlobStore::fetch(&f.index, &br).is_err());
}
