mod support;

use hsearch_client::{
    ClientError, Command, ConnectionProvider, ProviderState, SingleConnectionProvider,
};

use support::{endpoint, init_tracing, MockConnector};

fn single() -> (SingleConnectionProvider, std::sync::Arc<MockConnector>) {
    init_tracing();
    let connector = MockConnector::new();
    let provider = SingleConnectionProvider::with_connector(endpoint(6379), connector.clone());
    (provider, connector)
}

#[test]
fn acquire_closes_the_previous_connection() {
    let (provider, connector) = single();

    let mut first = provider.acquire().expect("first");
    let mut second = provider.acquire().expect("second");

    assert!(first.is_closed());
    assert!(matches!(
        first.send(&Command::new("PING")),
        Err(ClientError::ClosedHandle { .. })
    ));
    assert!(second.send(&Command::new("PING")).is_ok());
    assert_eq!(connector.opened(), 2);
    assert_eq!(connector.live(), 1);
    assert_eq!(provider.status().outstanding, 1);

    // Releasing a handle that was already superseded leaves the live one alone.
    provider.release(first);
    assert!(!second.is_closed());
    provider.release(second);
}

#[test]
fn release_closes_immediately() {
    let (provider, connector) = single();

    let handle = provider.acquire().expect("acquire");
    assert_eq!(connector.live(), 1);
    provider.release(handle);

    assert_eq!(connector.live(), 0);
    assert_eq!(provider.status().outstanding, 0);
    assert_eq!(provider.status().max_size, 1);
}

#[test]
fn closing_a_handle_twice_is_harmless() {
    let (provider, connector) = single();

    let handle = provider.acquire().expect("acquire");
    handle.close();
    handle.close();
    assert!(handle.is_closed());
    provider.release(handle);
    assert_eq!(connector.live(), 0);
}

#[test]
fn shutdown_rejects_new_acquires() {
    let (provider, connector) = single();
    let held = provider.acquire().expect("acquire");

    provider.shutdown();
    assert_eq!(provider.state(), ProviderState::Closed);
    assert!(held.is_closed());
    assert_eq!(connector.live(), 0);
    assert!(matches!(
        provider.acquire(),
        Err(ClientError::ProviderShutdown { .. })
    ));

    provider.release(held);
    provider.shutdown();
}

#[test]
fn connect_failure_surfaces_as_transport_error() {
    let (provider, connector) = single();
    connector
        .refuse
        .store(true, std::sync::atomic::Ordering::SeqCst);

    assert!(matches!(
        provider.acquire(),
        Err(ClientError::Transport { operation: "connect", .. })
    ));
    assert_eq!(provider.status().outstanding, 0);
}
