use super::*;
use crate::config::OpenAiConfig;

fn test_config() -> OpenAiConfig {
    OpenAiConfig {
        endpoint: "https://example.openai.azure.com".to_string(),
        api_version: "2023-07-01-preview".to_string(),
        embedding_deployment: "text-embedding-ada-002".to_string(),
        chat_deployment: "gpt-4-32k".to_string(),
        batch_size: 32,
        embedding_dimension: 1536,
    }
}

#[test]
fn client_configuration() {
    let client =
        EmbeddingClient::new(&test_config(), "secret".to_string()).expect("create client");

    assert_eq!(client.deployment, "text-embedding-ada-002");
    assert_eq!(client.batch_size, 32);
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    assert_eq!(
        client.endpoint.host_str(),
        Some("example.openai.azure.com")
    );
}

#[test]
fn client_builder_methods() {
    let client = EmbeddingClient::new(&test_config(), "secret".to_string())
        .expect("create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);
}

#[test]
fn embeddings_url_includes_deployment_and_api_version() {
    let client =
        EmbeddingClient::new(&test_config(), "secret".to_string()).expect("create client");
    let url = client.embeddings_url().expect("build url");

    assert_eq!(
        url.path(),
        "/openai/deployments/text-embedding-ada-002/embeddings"
    );
    assert_eq!(url.query(), Some("api-version=2023-07-01-preview"));
}

#[test]
fn reorder_restores_request_order() {
    let response = EmbedResponse {
        data: vec![
            EmbeddingData {
                index: 2,
                embedding: vec![3.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: 1,
                embedding: vec![2.0],
            },
        ],
    };

    let vectors = reorder_embeddings(response, 3).expect("reorder");
    assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0]]);
}

#[test]
fn count_mismatch_is_rejected() {
    let response = EmbedResponse {
        data: vec![EmbeddingData {
            index: 0,
            embedding: vec![1.0],
        }],
    };

    let err = reorder_embeddings(response, 2).expect_err("must fail");
    assert!(matches!(err, RepoQueryError::Network(_)));
}

#[test]
fn out_of_range_index_is_rejected() {
    let response = EmbedResponse {
        data: vec![
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: 5,
                embedding: vec![2.0],
            },
        ],
    };

    let err = reorder_embeddings(response, 2).expect_err("must fail");
    assert!(matches!(err, RepoQueryError::Network(_)));
}

#[test]
fn duplicate_index_is_rejected() {
    let response = EmbedResponse {
        data: vec![
            EmbeddingData {
                index: 0,
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: 0,
                embedding: vec![2.0],
            },
        ],
    };

    let err = reorder_embeddings(response, 2).expect_err("must fail");
    assert!(matches!(err, RepoQueryError::Network(_)));
}

#[test]
fn empty_batch_short_circuits() {
    let client =
        EmbeddingClient::new(&test_config(), "secret".to_string()).expect("create client");
    let vectors = client.embed_batch(&[]).expect("embed");
    assert!(vectors.is_empty());
}
