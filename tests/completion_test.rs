//! Integration tests for calls routed through the dispatcher with a result.

use std::time::Duration;

use serialq::config::DispatcherConfig;
use serialq::{Dispatcher, Error, Origin};

fn test_dispatcher() -> Dispatcher {
    Dispatcher::new(DispatcherConfig::default()).expect("failed to start dispatcher")
}

#[tokio::test]
async fn awaited_completion_delivers_value() {
    let dispatcher = test_dispatcher();

    let completion = dispatcher
        .submit_call(
            Origin::Completion {
                connection: Some("tcp -p 12010".to_string()),
            },
            || 6 * 7,
        )
        .unwrap();
    let value = tokio::time::timeout(Duration::from_secs(5), completion)
        .await
        .expect("completion timed out")
        .unwrap();
    assert_eq!(value, 42);

    let d = dispatcher.clone();
    tokio::task::spawn_blocking(move || d.terminate())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn awaited_completions_resolve_in_submission_order() {
    let dispatcher = test_dispatcher();
    let completions: Vec<_> = (0..10)
        .map(|i| dispatcher.submit_call(Origin::Other, move || i).unwrap())
        .collect();

    let mut values = Vec::new();
    for completion in completions {
        values.push(completion.await.unwrap());
    }
    assert_eq!(values, (0..10).collect::<Vec<_>>());

    let d = dispatcher.clone();
    tokio::task::spawn_blocking(move || d.terminate())
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn blocking_wait_delivers_value() {
    let dispatcher = test_dispatcher();
    let completion = dispatcher
        .submit_call(Origin::Other, || "reply".to_string())
        .unwrap();
    assert_eq!(completion.wait().unwrap(), "reply");
    dispatcher.terminate().unwrap();
}

#[test]
fn panicking_call_resolves_to_item_fault() {
    let dispatcher = test_dispatcher();
    let completion = dispatcher
        .submit_call(Origin::Other, || -> u32 { panic!("servant exploded") })
        .unwrap();

    match completion.wait() {
        Err(Error::ItemFault(message)) => assert_eq!(message, "servant exploded"),
        other => panic!("expected ItemFault, got {other:?}"),
    }

    // Worker is still alive and counted the fault.
    assert_eq!(
        dispatcher.submit_call(Origin::Other, || 1).unwrap().wait().unwrap(),
        1
    );
    dispatcher.terminate().unwrap();
    assert_eq!(dispatcher.faulted(), 1);
}

#[test]
fn completion_id_matches_submission() {
    let dispatcher = test_dispatcher();
    let completion = dispatcher.submit_call(Origin::Other, || ()).unwrap();
    let id = completion.id();
    completion.wait().unwrap();
    dispatcher.terminate().unwrap();
    assert_eq!(id.to_string().len(), 8);
}

#[tokio::test]
async fn blocking_wait_inside_runtime_is_refused() {
    let dispatcher = test_dispatcher();
    let completion = dispatcher.submit_call(Origin::Other, || 5).unwrap();
    assert!(matches!(completion.wait(), Err(Error::BlockingInRuntime)));

    // The call still ran; a fresh completion can be awaited normally.
    let again = dispatcher.submit_call(Origin::Other, || 6).unwrap();
    assert_eq!(again.await.unwrap(), 6);

    let d = dispatcher.clone();
    tokio::task::spawn_blocking(move || d.terminate())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dispatcher.executed(), 2);
}
