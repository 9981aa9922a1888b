//! End-to-end container tests: encrypt/decrypt round trips, random access,
//! and integrity sensitivity, all against the offline (wrapped key access)
//! path with a known payload key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use tdf3::{
    Chunker, EncryptOptions, KasTarget, PayloadKey, PolicyObject, SegmentHashAlg,
    TdfArchiveReader, TdfArchiveWriter, TdfError, TdfManifest, TdfReader, TdfWriter,
};
use tdf3_crypto::SessionKeyPair;

const TEST_KEY: [u8; 32] = [0x42; 32];

fn test_policy() -> PolicyObject {
    PolicyObject::new(vec![], vec!["reader@example.com".to_string()])
}

async fn encrypt_offline(
    payload: &[u8],
    segment_size: u64,
    hash_alg: SegmentHashAlg,
) -> (Vec<u8>, TdfManifest) {
    let kas_keys = SessionKeyPair::generate().unwrap();
    let writer = TdfWriter::new(
        EncryptOptions {
            segment_size,
            segment_hash_alg: hash_alg,
            payload_key: Some(PayloadKey::from_slice(&TEST_KEY).unwrap()),
            ..Default::default()
        }
        .freeze()
        .unwrap(),
    );
    let targets = vec![
        KasTarget::wrapped("http://kas.example.com").with_public_key(kas_keys.public_key_pem())
    ];
    writer
        .encrypt_to_vec(&Chunker::buffer(payload.to_vec()), &test_policy(), None, &targets)
        .await
        .unwrap()
}

async fn open_with_key(container: Vec<u8>) -> TdfReader {
    let mut reader = TdfReader::open(Chunker::buffer(container)).await.unwrap();
    reader.use_payload_key(&TEST_KEY).unwrap();
    reader
}

/// Repack a container with altered parts, leaving the rest untouched
async fn rebuild(payload: &[u8], manifest_json: &str) -> Vec<u8> {
    let mut writer = TdfArchiveWriter::new(std::io::Cursor::new(Vec::new()));
    writer.start_payload().unwrap();
    writer.append_segment(payload).unwrap();
    writer.finish(manifest_json).unwrap().into_inner()
}

async fn unpack(container: &[u8]) -> (Vec<u8>, TdfManifest) {
    let reader = TdfArchiveReader::open(Chunker::buffer(container.to_vec()))
        .await
        .unwrap();
    let payload = reader.read_payload(0, reader.payload_size()).await.unwrap();
    let manifest = TdfManifest::from_json(reader.manifest_json()).unwrap();
    (payload, manifest)
}

#[tokio::test]
async fn tiny_payload_layout_and_roundtrip() {
    let (container, manifest) =
        encrypt_offline(b"hello world", 1_000_000, SegmentHashAlg::Gmac).await;

    let segments = &manifest.encryption_information.integrity_information.segments;
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].segment_size, Some(11));
    assert_eq!(segments[0].encrypted_segment_size, Some(39)); // 12 + 11 + 16

    let reader = open_with_key(container).await;
    assert_eq!(reader.read_all().await.unwrap(), b"hello world");
}

#[tokio::test]
async fn empty_payload_roundtrip() {
    let (container, manifest) = encrypt_offline(b"", 1_000_000, SegmentHashAlg::Gmac).await;
    assert!(manifest
        .encryption_information
        .integrity_information
        .segments
        .is_empty());

    let reader = open_with_key(container).await;
    assert_eq!(reader.plaintext_size(), 0);
    assert!(reader.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn roundtrip_across_segment_sizes() {
    let mut payload = vec![0u8; 2_500_000];
    StdRng::seed_from_u64(7).fill_bytes(&mut payload);

    for segment_size in [16 * 1024, 1_000_000, 4 * 1024 * 1024] {
        for alg in [SegmentHashAlg::Gmac, SegmentHashAlg::Hs256] {
            let (container, _) = encrypt_offline(&payload, segment_size, alg).await;
            let reader = open_with_key(container).await;
            assert_eq!(
                reader.read_all().await.unwrap(),
                payload,
                "segment size {segment_size}, alg {alg:?}"
            );
        }
    }
}

#[tokio::test]
async fn two_segment_payload() {
    let payload = vec![0u8; 1_500_000];
    let (container, manifest) = encrypt_offline(&payload, 1_000_000, SegmentHashAlg::Gmac).await;

    let segments = &manifest.encryption_information.integrity_information.segments;
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].segment_size, Some(1_000_000));
    assert_eq!(segments[1].segment_size, Some(500_000));

    let reader = open_with_key(container).await;
    // Window straddling the segment boundary
    let window = reader.read_range(999_990, 1_000_010).await.unwrap();
    assert_eq!(window, vec![0u8; 20]);
}

#[tokio::test]
async fn random_access_matches_source() {
    let mut payload = vec![0u8; 10 * 1024 * 1024];
    StdRng::seed_from_u64(1234).fill_bytes(&mut payload);

    let (container, _) = encrypt_offline(&payload, 256 * 1024, SegmentHashAlg::Gmac).await;
    let reader = open_with_key(container).await;

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..50 {
        let a = rng.gen_range(0..payload.len() as u64);
        let b = rng.gen_range(a..=payload.len() as u64);
        assert_eq!(
            reader.read_range(a, b).await.unwrap(),
            &payload[a as usize..b as usize],
            "range {a}..{b}"
        );
    }
}

#[tokio::test]
async fn payload_bit_flip_fails_before_plaintext() {
    let payload = vec![0u8; 1_500_000];
    let (container, _) = encrypt_offline(&payload, 1_000_000, SegmentHashAlg::Gmac).await;

    let (mut raw_payload, manifest) = unpack(&container).await;
    raw_payload[100_000] ^= 0x01;
    let tampered = rebuild(&raw_payload, &manifest.to_json().unwrap()).await;

    let mut reader = TdfReader::open(Chunker::buffer(tampered)).await.unwrap();
    reader.use_payload_key(&TEST_KEY).unwrap();

    let err = reader.read_all().await.unwrap_err();
    assert!(matches!(err, TdfError::Crypto { .. }), "{err}");
    assert_eq!(err.segment(), Some(0));
    assert_eq!(err.code(), "TDF3_E_CRYPTO");
}

#[tokio::test]
async fn segment_hash_tamper_fails_root_signature() {
    let (container, _) = encrypt_offline(b"hello world", 1_000_000, SegmentHashAlg::Gmac).await;
    let (raw_payload, mut manifest) = unpack(&container).await;

    let hash = &mut manifest.encryption_information.integrity_information.segments[0].hash;
    let mut raw = BASE64.decode(&*hash).unwrap();
    raw[0] ^= 0x01;
    *hash = BASE64.encode(&raw);

    let tampered = rebuild(&raw_payload, &manifest.to_json().unwrap()).await;
    let mut reader = TdfReader::open(Chunker::buffer(tampered)).await.unwrap();

    let err = reader.use_payload_key(&TEST_KEY).unwrap_err();
    assert!(matches!(err, TdfError::Crypto { .. }), "{err}");
}

#[tokio::test]
async fn root_signature_tamper_rejected() {
    let (container, _) = encrypt_offline(b"hello world", 1_000_000, SegmentHashAlg::Gmac).await;
    let (raw_payload, mut manifest) = unpack(&container).await;

    let sig = &mut manifest
        .encryption_information
        .integrity_information
        .root_signature
        .sig;
    let mut raw = BASE64.decode(&*sig).unwrap();
    raw[0] ^= 0x01;
    *sig = BASE64.encode(&raw);

    let tampered = rebuild(&raw_payload, &manifest.to_json().unwrap()).await;
    let mut reader = TdfReader::open(Chunker::buffer(tampered)).await.unwrap();

    let err = reader.use_payload_key(&TEST_KEY).unwrap_err();
    assert!(matches!(err, TdfError::Crypto { .. }), "{err}");
}

#[tokio::test]
async fn policy_binding_tamper_rejected() {
    let (container, _) = encrypt_offline(b"hello world", 1_000_000, SegmentHashAlg::Gmac).await;
    let (raw_payload, mut manifest) = unpack(&container).await;

    manifest.encryption_information.key_access[0].policy_binding =
        BASE64.encode([0u8; 32]);

    let tampered = rebuild(&raw_payload, &manifest.to_json().unwrap()).await;
    let mut reader = TdfReader::open(Chunker::buffer(tampered)).await.unwrap();

    let err = reader.use_payload_key(&TEST_KEY).unwrap_err();
    assert!(matches!(err, TdfError::Policy { .. }), "{err}");
    assert_eq!(err.code(), "TDF3_E_POLICY");
}

#[tokio::test]
async fn policy_swap_rejected() {
    let (container, _) = encrypt_offline(b"hello world", 1_000_000, SegmentHashAlg::Gmac).await;
    let (raw_payload, mut manifest) = unpack(&container).await;

    // Valid base64, different policy JSON: the binding no longer matches
    let other_policy = PolicyObject::new(vec![], vec!["mallory@example.com".to_string()]);
    manifest.encryption_information.policy = BASE64.encode(other_policy.to_json().unwrap());

    let tampered = rebuild(&raw_payload, &manifest.to_json().unwrap()).await;
    let mut reader = TdfReader::open(Chunker::buffer(tampered)).await.unwrap();

    let err = reader.use_payload_key(&TEST_KEY).unwrap_err();
    assert!(matches!(err, TdfError::Policy { .. }), "{err}");
}

#[tokio::test]
async fn hs256_segment_tamper_detected_on_read() {
    // With HS256 the segment hash covers the full stored bytes too
    let mut payload = vec![0u8; 200_000];
    StdRng::seed_from_u64(5).fill_bytes(&mut payload);
    let (container, _) = encrypt_offline(&payload, 64 * 1024, SegmentHashAlg::Hs256).await;

    let (mut raw_payload, manifest) = unpack(&container).await;
    let last = raw_payload.len() - 1;
    raw_payload[last] ^= 0x80;
    let tampered = rebuild(&raw_payload, &manifest.to_json().unwrap()).await;

    let mut reader = TdfReader::open(Chunker::buffer(tampered)).await.unwrap();
    reader.use_payload_key(&TEST_KEY).unwrap();

    let err = reader.read_all().await.unwrap_err();
    assert!(matches!(err, TdfError::Crypto { .. }), "{err}");
    assert_eq!(err.segment(), Some(3));
}

#[tokio::test]
async fn file_roundtrip() {
    let kas_keys = SessionKeyPair::generate().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("input.bin");
    let dest_path = dir.path().join("output.tdf");

    let mut payload = vec![0u8; 300_000];
    StdRng::seed_from_u64(11).fill_bytes(&mut payload);
    std::fs::write(&source_path, &payload).unwrap();

    let writer = TdfWriter::new(
        EncryptOptions {
            segment_size: 128 * 1024,
            payload_key: Some(PayloadKey::from_slice(&TEST_KEY).unwrap()),
            ..Default::default()
        }
        .freeze()
        .unwrap(),
    );
    let targets = vec![
        KasTarget::wrapped("http://kas.example.com").with_public_key(kas_keys.public_key_pem())
    ];
    let source = Chunker::file(&source_path).await.unwrap();
    writer
        .encrypt_to_file(&source, &test_policy(), None, &targets, &dest_path)
        .await
        .unwrap();

    let mut reader = TdfReader::open(Chunker::file(&dest_path).await.unwrap())
        .await
        .unwrap();
    reader.use_payload_key(&TEST_KEY).unwrap();
    assert_eq!(reader.read_all().await.unwrap(), payload);
}

#[tokio::test]
async fn streaming_decrypt_order_and_length() {
    let mut payload = vec![0u8; 500_000];
    StdRng::seed_from_u64(21).fill_bytes(&mut payload);
    let (container, _) = encrypt_offline(&payload, 128 * 1024, SegmentHashAlg::Gmac).await;

    let reader = open_with_key(container).await;
    let mut sink = Vec::new();
    let written = reader.decrypt_to(&mut sink).await.unwrap();

    assert_eq!(written, payload.len() as u64);
    assert_eq!(sink, payload);
}

#[tokio::test]
async fn encrypted_metadata_roundtrip() {
    let kas_keys = SessionKeyPair::generate().unwrap();
    let writer = TdfWriter::new(
        EncryptOptions {
            metadata: Some(r#"{"origin":"ingest-7"}"#.to_string()),
            payload_key: Some(PayloadKey::from_slice(&TEST_KEY).unwrap()),
            ..Default::default()
        }
        .freeze()
        .unwrap(),
    );
    let targets = vec![
        KasTarget::wrapped("http://kas.example.com").with_public_key(kas_keys.public_key_pem())
    ];
    let (container, _) = writer
        .encrypt_to_vec(
            &Chunker::buffer(b"with metadata".to_vec()),
            &test_policy(),
            None,
            &targets,
        )
        .await
        .unwrap();

    let reader = open_with_key(container).await;
    assert_eq!(
        reader.encrypted_metadata().unwrap().as_deref(),
        Some(r#"{"origin":"ingest-7"}"#)
    );
}
