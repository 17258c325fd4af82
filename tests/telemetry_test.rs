//! Integration tests for telemetry initialization and span helpers.

use serialq::config::{Config, DispatcherConfig};
use serialq::{Dispatcher, DispatcherState, Origin, WorkId};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = Config {
        otel_endpoint: None,
        log_level: "debug".to_string(),
        dispatcher: DispatcherConfig::default(),
    };
    // May return Err if a global subscriber was already set; that is acceptable.
    let guard = serialq::telemetry::init_telemetry(&config);
    if let Ok(guard) = &guard {
        assert!(!guard.is_exporting());
    }

    // Exercise the instrumented paths with the subscriber installed.
    let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
    dispatcher.dispatch(|| tracing::info!("inside item")).unwrap();
    dispatcher.terminate().unwrap();
}

#[test]
fn item_span_creates_with_connection() {
    let origin = Origin::Request {
        connection: Some("tcp -h 127.0.0.1".to_string()),
    };
    let span = serialq::telemetry::work::start_item_span(&WorkId::new(), &origin);
    let _enter = span.enter();
    serialq::telemetry::work::record_state_transition(
        DispatcherState::Running,
        DispatcherState::Draining,
    );
}
