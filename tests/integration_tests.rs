use gtfs_rt_trip_updates::config::TripUpdateSourceConfig;
use gtfs_rt_trip_updates::gtfs_rt::feed_header::Incrementality;
use gtfs_rt_trip_updates::gtfs_rt::{
    FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripDescriptorExtension, TripUpdate,
    VehiclePosition,
};
use gtfs_rt_trip_updates::parser::ExtensionRegistry;
use gtfs_rt_trip_updates::source::{HttpTripUpdateSource, PollOutcome, TripUpdateSource};
use pretty_assertions::assert_eq;
use prost::Message;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ACCEPT: &str = "application/x-google-protobuf, application/x-protobuf, application/protobuf, application/octet-stream, */*";

fn trip_entity(id: &str, trip_id: &str) -> FeedEntity {
    FeedEntity {
        id: id.to_string(),
        trip_update: Some(TripUpdate {
            trip: TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                mfdz_trip_descriptor: Some(TripDescriptorExtension {
                    agency_id: Some("agency1".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn vehicle_entity(id: &str) -> FeedEntity {
    FeedEntity {
        id: id.to_string(),
        vehicle: Some(VehiclePosition::default()),
        ..Default::default()
    }
}

/// Encodes entities as a `FeedMessage` without any header field on the wire.
fn encode_headerless(entities: &[FeedEntity]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entity in entities {
        prost::encoding::message::encode(2, entity, &mut buf);
    }
    buf
}

async fn agency1_server(body: Vec<u8>) -> MockServer {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rt"))
        .and(header_exists("Accept"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&mock_server)
        .await;
    mock_server
}

fn agency1_source(server: &MockServer) -> HttpTripUpdateSource {
    HttpTripUpdateSource::new(TripUpdateSourceConfig::new(
        "agency1",
        format!("{}/rt", server.uri()),
    ))
    .expect("valid feed config")
}

fn trip_ids(outcome: &PollOutcome) -> Vec<String> {
    outcome
        .updates()
        .expect("poll should succeed")
        .iter()
        .map(|tu| tu.trip.trip_id.clone().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_headerless_feed_returns_trip_updates_in_order() {
    let body = encode_headerless(&[
        trip_entity("1", "trip-a"),
        vehicle_entity("2"),
        trip_entity("3", "trip-b"),
    ]);
    let server = agency1_server(body).await;
    let source = agency1_source(&server);

    let outcome = source.get_updates().await;

    assert_eq!(trip_ids(&outcome), vec!["trip-a", "trip-b"]);
    assert_eq!(outcome.is_full_dataset(), Some(true));
    assert!(source.full_dataset_value_of_last_updates());

    // Vendor extension data is kept with the default registry.
    let first = &outcome.updates().unwrap()[0];
    assert_eq!(
        first
            .trip
            .mfdz_trip_descriptor
            .as_ref()
            .and_then(|ext| ext.agency_id.as_deref()),
        Some("agency1")
    );
}

#[tokio::test]
async fn test_differential_feed() {
    let body = FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            incrementality: Some(Incrementality::Differential as i32),
            ..Default::default()
        },
        entity: vec![trip_entity("1", "trip-a")],
    }
    .encode_to_vec();
    let server = agency1_server(body).await;
    let source = agency1_source(&server);

    let outcome = source.get_updates().await;

    assert_eq!(trip_ids(&outcome), vec!["trip-a"]);
    assert!(!source.full_dataset_value_of_last_updates());
    assert_eq!(source.feed_id(), "agency1");
}

#[tokio::test]
async fn test_unavailable_feed_returns_no_result() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;
    let source = agency1_source(&mock_server);

    let outcome = source.get_updates().await;

    assert!(matches!(outcome, PollOutcome::Unavailable));
    assert!(outcome.updates().is_none());
    assert!(source.full_dataset_value_of_last_updates());
}

#[tokio::test]
async fn test_feed_id_is_stable_across_outcomes() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFF, 0xFF]))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;
    let source = agency1_source(&mock_server);

    assert_eq!(source.feed_id(), "agency1");
    assert!(matches!(source.get_updates().await, PollOutcome::DecodeFailed(_)));
    assert_eq!(source.feed_id(), "agency1");
    assert!(matches!(source.get_updates().await, PollOutcome::Unavailable));
    assert_eq!(source.feed_id(), "agency1");
}

#[tokio::test]
async fn test_empty_registry_drops_vendor_fields() {
    let server = agency1_server(encode_headerless(&[trip_entity("1", "trip-a")])).await;
    let source = agency1_source(&server).with_registry(ExtensionRegistry::empty());

    let outcome = source.get_updates().await;

    let update = &outcome.updates().unwrap()[0];
    assert!(update.trip.mfdz_trip_descriptor.is_none());
    assert_eq!(update.trip.trip_id.as_deref(), Some("trip-a"));
}

#[tokio::test]
async fn test_default_accept_header_is_sent() {
    let server = agency1_server(encode_headerless(&[])).await;
    let source = agency1_source(&server);

    source.get_updates().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let accept = requests[0].headers.get("accept").unwrap().to_str().unwrap();
    assert_eq!(accept, ACCEPT);
}
