use crate::error::ErrorDetails;
use crate::observability::install_crypto_provider;

use super::ValkeyConnectionInfo;

/// Connecting with a TLS URL (`rediss://`) must produce a connection error rather
/// than a rustls crypto provider panic.
#[tokio::test]
async fn test_tls_url_gives_connection_error() {
    install_crypto_provider();

    let result = ValkeyConnectionInfo::new("rediss://edgesplit.invalid:6379").await;
    let Err(err) = result else {
        panic!("TLS connection to an unresolvable host should fail");
    };
    assert!(
        matches!(err.get_details(), ErrorDetails::ValkeyConnection { .. }),
        "expected ValkeyConnection error, got: {err}"
    );
}

#[tokio::test]
async fn test_invalid_url_gives_connection_error() {
    let result = ValkeyConnectionInfo::new("not-a-valkey-url").await;
    let Err(err) = result else {
        panic!("invalid URL should fail");
    };
    assert!(
        matches!(err.get_details(), ErrorDetails::ValkeyConnection { .. }),
        "expected ValkeyConnection error, got: {err}"
    );
}
