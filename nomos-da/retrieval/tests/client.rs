use std::sync::Arc;

use nomos_da_retrieval::common::{BlobCommitments, BlobParams};
use nomos_da_retrieval::encoding::EncodingError;
use nomos_da_retrieval::pool::PoolError;
use nomos_da_retrieval::probe::StageTimeline;
use nomos_da_retrieval::testutils::{
    blob_key, commitments_for, expected_blob, round_robin_assignments, Behavior, MockCodec,
    ScriptedTransport, StaticAssignmentSource,
};
use nomos_da_retrieval::{
    Assignments, ConfigError, RetrievalClient, RetrievalError, RetrievalSettings,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::EnvFilter;

type Client = RetrievalClient<ScriptedTransport, MockCodec, MockCodec, StaticAssignmentSource>;

const VERSION: u16 = 1;
const QUORUM: u8 = 0;
const REFERENCE_BLOCK: u64 = 1_024;
// 16 chunks at coding rate 4: any 4 verified chunks rebuild the blob
const PARAMS: BlobParams = BlobParams {
    num_chunks: 16,
    coding_rate: 4,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .with_writer(TestWriter::default())
        .try_init();
}

fn client_with(
    transport: ScriptedTransport,
    codec: MockCodec,
    source: StaticAssignmentSource,
) -> (Client, Arc<StaticAssignmentSource>) {
    let codec = Arc::new(codec);
    let source = Arc::new(source);
    let client = RetrievalClient::new(
        RetrievalSettings {
            compute_pool_size: 2,
            ..Default::default()
        },
        Arc::new(transport),
        Arc::clone(&codec),
        codec,
        Arc::clone(&source),
    )
    .unwrap();
    (client, source)
}

fn honest_client(assignments: Assignments) -> (Client, Arc<StaticAssignmentSource>) {
    client_with(
        ScriptedTransport::new(&assignments),
        MockCodec::new(PARAMS.minimum_chunk_count()),
        StaticAssignmentSource::new(VERSION, PARAMS, assignments),
    )
}

async fn get_blob(client: &Client, commitments: BlobCommitments) -> Result<bytes::Bytes, RetrievalError> {
    client
        .get_blob(
            &CancellationToken::new(),
            blob_key(9),
            VERSION,
            commitments,
            REFERENCE_BLOCK,
            QUORUM,
        )
        .await
}

#[tokio::test]
async fn retrieves_blob_through_every_stage() {
    init_tracing();
    let (client, source) = honest_client(round_robin_assignments(8, 16));
    let commitments = commitments_for(16);
    let timeline = StageTimeline::new();

    let blob = client
        .get_blob_with_probe(
            &CancellationToken::new(),
            blob_key(9),
            VERSION,
            commitments.clone(),
            REFERENCE_BLOCK,
            QUORUM,
            &timeline,
        )
        .await
        .unwrap();

    assert_eq!(blob, expected_blob(&blob_key(9), commitments.byte_length()));
    assert_eq!(
        timeline.stages(),
        vec![
            "verify_commitment",
            "get_blob_params",
            "get_encoding_params",
            "get_assignments",
            "download_and_verify",
            "decode",
        ]
    );
    timeline.finish();
    assert_eq!(source.queries(), vec![(REFERENCE_BLOCK, QUORUM, blob_key(9))]);
}

#[tokio::test]
async fn serves_consecutive_requests() {
    init_tracing();
    let (client, _) = honest_client(round_robin_assignments(8, 16));
    for _ in 0..3 {
        assert!(get_blob(&client, commitments_for(16)).await.is_ok());
    }
}

#[tokio::test]
async fn rejects_invalid_commitment() {
    init_tracing();
    let assignments = round_robin_assignments(4, 16);
    let (client, source) = client_with(
        ScriptedTransport::new(&assignments),
        MockCodec::new(4).rejecting_commitment(),
        StaticAssignmentSource::new(VERSION, PARAMS, assignments),
    );

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::Commitment { .. })
    ));
    assert!(source.queries().is_empty());
}

#[tokio::test]
async fn rejects_unknown_blob_version() {
    init_tracing();
    let assignments = round_robin_assignments(4, 16);
    let (client, _) = client_with(
        ScriptedTransport::new(&assignments),
        MockCodec::new(4),
        StaticAssignmentSource::new(VERSION + 1, PARAMS, assignments),
    );

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::UnknownBlobVersion(VERSION))
    ));
}

#[tokio::test]
async fn rejects_malformed_blob_length() {
    init_tracing();
    let (client, _) = honest_client(round_robin_assignments(4, 16));
    let commitments = BlobCommitments {
        length: 12,
        ..commitments_for(16)
    };

    assert!(matches!(
        get_blob(&client, commitments).await,
        Err(RetrievalError::Encoding(EncodingError::NotPowerOfTwo(12)))
    ));
}

#[tokio::test]
async fn surfaces_assignment_failures() {
    init_tracing();
    let assignments = round_robin_assignments(4, 16);
    let (client, source) = client_with(
        ScriptedTransport::new(&assignments),
        MockCodec::new(4),
        StaticAssignmentSource::new(VERSION, PARAMS, assignments).failing(),
    );

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::Assignment { .. })
    ));
    assert_eq!(source.queries().len(), 1);
}

#[tokio::test]
async fn rejects_quorum_without_operators() {
    init_tracing();
    let (client, _) = honest_client(Assignments::new());

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::NoOperators(QUORUM))
    ));
}

#[tokio::test]
async fn rejects_params_without_redundancy() {
    init_tracing();
    let assignments = round_robin_assignments(4, 16);
    // coding rate above the chunk count leaves nothing to reconstruct from
    let params = BlobParams {
        num_chunks: 4,
        coding_rate: 8,
    };
    let (client, _) = client_with(
        ScriptedTransport::new(&assignments),
        MockCodec::new(1),
        StaticAssignmentSource::new(VERSION, params, assignments),
    );

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::Config(ConfigError::ZeroMinimumChunkCount))
    ));
}

#[tokio::test]
async fn fails_when_operators_are_unreachable() {
    init_tracing();
    let assignments = round_robin_assignments(8, 16);
    let (client, _) = client_with(
        ScriptedTransport::new(&assignments).with_default(Behavior::Fail),
        MockCodec::new(4),
        StaticAssignmentSource::new(VERSION, PARAMS, assignments),
    );

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::NotEnoughChunks {
            verified: 0,
            minimum: 4,
            ..
        })
    ));
}

#[tokio::test]
async fn cancelled_before_assignments_resolve() {
    init_tracing();
    let (client, source) = honest_client(round_robin_assignments(4, 16));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = client
        .get_blob(
            &cancel,
            blob_key(9),
            VERSION,
            commitments_for(16),
            REFERENCE_BLOCK,
            QUORUM,
        )
        .await;
    assert!(matches!(
        result,
        Err(RetrievalError::Cancelled {
            stage: "get_blob_params",
            ..
        })
    ));
    assert!(source.queries().is_empty());
}

#[tokio::test]
async fn closed_client_refuses_requests() {
    init_tracing();
    let (client, _) = honest_client(round_robin_assignments(4, 16));
    client.close();

    assert!(matches!(
        get_blob(&client, commitments_for(16)).await,
        Err(RetrievalError::Pool(PoolError::Closed("connection")))
    ));
}

#[test]
fn rejects_invalid_settings() {
    let assignments = round_robin_assignments(4, 16);
    let result = Client::new(
        RetrievalSettings {
            download_pessimism: 0.5,
            ..Default::default()
        },
        Arc::new(ScriptedTransport::new(&assignments)),
        Arc::new(MockCodec::new(4)),
        Arc::new(MockCodec::new(4)),
        Arc::new(StaticAssignmentSource::new(VERSION, PARAMS, assignments)),
    );
    assert!(matches!(
        result,
        Err(RetrievalError::Config(ConfigError::DownloadPessimism(_)))
    ));
}
