mod common;

use common::{loopback, next_event, serve_files, FileError, FileServer, FileServerStub};
use rmi::{stub, Fault, RemoteError, ServerEvent, Stub};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    net::TcpStream,
    time::Duration,
};
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread")]
async fn size_round_trip_then_stop() {
    let (skeleton, mut events) = serve_files(loopback());
    assert!(skeleton.is_running());

    let files: FileServerStub = stub::from_skeleton(&skeleton).unwrap();
    assert_eq!(files.size("/x".to_owned()).await.unwrap(), 999);
    assert_eq!(files.echo(7, "hi".to_owned()).await.unwrap(), "7:hi");

    let address = skeleton.bound_address().unwrap();
    skeleton.stop().unwrap();
    assert!(!skeleton.is_running());
    assert!(TcpStream::connect(address).is_err());

    let err = files.size("/x".to_owned()).await.unwrap_err();
    assert!(matches!(err, FileError::Remote(RemoteError::Connect { .. })));

    assert_eq!(next_event(&mut events).await, ServerEvent::Stopped(None));
    skeleton.stop().unwrap();
    let late = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(late.is_err(), "expected exactly one STOPPED event, got {late:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn application_errors_come_back_verbatim() {
    let (skeleton, mut events) = serve_files(loopback());
    let files: FileServerStub = stub::from_skeleton(&skeleton).unwrap();

    let err = files.size("/missing".to_owned()).await.unwrap_err();
    assert_eq!(err, FileError::NotFound("/missing".to_owned()));

    let ServerEvent::ServiceError(reported) = next_event(&mut events).await else {
        panic!("expected a service error");
    };
    assert_eq!(reported.method.unwrap().to_string(), "size(String)");
    match reported.fault {
        Fault::Application(raised) => assert_eq!(raised.message(), "no such file: /missing"),
        other => panic!("expected an application fault, got {other:?}"),
    }

    // The failed call does not disturb later ones.
    assert_eq!(files.size("/y".to_owned()).await.unwrap(), 999);
    skeleton.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stubs_compare_hash_and_print_locally() {
    let (skeleton, _events) = serve_files(loopback());
    let address = skeleton.bound_address().unwrap();
    let a: FileServerStub = stub::from_skeleton(&skeleton).unwrap();
    let b: FileServerStub = stub::bind(address).unwrap();
    skeleton.stop().unwrap();

    // None of these touch the network; the skeleton is already stopped.
    assert_eq!(a, b);
    let hash = |stub: &FileServerStub| {
        let mut hasher = DefaultHasher::new();
        stub.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash(&a), hash(&b));
    assert_eq!(
        a.to_string(),
        format!("FileServer[host: 127.0.0.1, port: {}]", address.port())
    );
    assert_eq!(a.client().address(), address);

    let elsewhere: FileServerStub = stub::bind("127.0.0.1:1".parse().unwrap()).unwrap();
    assert_ne!(a, elsewhere);
}

#[tokio::test(flavor = "multi_thread")]
async fn host_names_are_resolved_for_the_bound_port() {
    let (skeleton, _events) = serve_files(loopback());
    let files: FileServerStub = stub::from_skeleton_with_host(&skeleton, "localhost")
        .await
        .unwrap();
    assert_eq!(files.client().address().port(), skeleton.bound_address().unwrap().port());
    if files.client().address().is_ipv4() {
        assert_eq!(files.size("/x".to_owned()).await.unwrap(), 999);
    }
    skeleton.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn in_flight_calls_finish_before_stopped() {
    let (skeleton, mut events) = serve_files(loopback());
    let files: FileServerStub = stub::from_skeleton(&skeleton).unwrap();

    let call = tokio::spawn(async move { files.nap(300).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    skeleton.stop().unwrap();

    call.await.unwrap().unwrap();
    assert_eq!(next_event(&mut events).await, ServerEvent::Stopped(None));
}
