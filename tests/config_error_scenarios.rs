//! Construction-time config validation, end to end through `Broker::new`.

mod common;

use common::FakeBackend;
use relay_broker::config::{
    BackendOptions, BrokerOptions, BrokerType, CloudQueueOptions, CloudServiceBusOptions, ServiceBusEntityType,
};
use relay_broker::{Broker, BrokerError};

#[test]
fn missing_cloud_queue_bag_is_invalid_configuration() {
    let options = BrokerOptions { broker_type: BrokerType::CloudQueue, ..BrokerOptions::default() };
    let err = Broker::new(options, FakeBackend::default()).unwrap_err();
    assert!(matches!(err, BrokerError::InvalidConfiguration(_)));
    assert!(err.to_string().contains("AWS SQS/SNS"));
}

#[test]
fn missing_service_bus_bag_is_invalid_configuration() {
    let options = BrokerOptions { broker_type: BrokerType::CloudServiceBus, ..BrokerOptions::default() };
    let err = Broker::new(options, FakeBackend::default()).unwrap_err();
    assert!(matches!(err, BrokerError::InvalidConfiguration(_)));
    assert!(err.to_string().contains("Azure Service Bus"));
}

#[test]
fn service_bus_with_empty_connection_string_is_rejected() {
    let options = BrokerOptions {
        broker_type: BrokerType::CloudServiceBus,
        backend: BackendOptions {
            cloud_service_bus: Some(CloudServiceBusOptions {
                connection_string: String::new(),
                entity_type: ServiceBusEntityType::Queue,
                default_entity_name: None,
            }),
            ..BackendOptions::default()
        },
        ..BrokerOptions::default()
    };
    let err = Broker::new(options, FakeBackend::default()).unwrap_err();
    assert!(matches!(err, BrokerError::InvalidConfiguration(_)));
    assert!(err.to_string().contains("Azure Service Bus connection string is required."));
}

#[test]
fn cloud_queue_with_region_set_constructs_even_without_a_default_queue() {
    let options = BrokerOptions {
        broker_type: BrokerType::CloudQueue,
        backend: BackendOptions {
            cloud_queue: Some(CloudQueueOptions {
                region: "us-east-1".to_string(),
                access_key_id: String::new(),
                secret_access_key: String::new(),
                default_queue_url: None,
                default_topic_arn: None,
                use_fifo_queue: false,
                message_group_id: None,
                message_deduplication_id: None,
            }),
            ..BackendOptions::default()
        },
        ..BrokerOptions::default()
    };
    Broker::new(options, FakeBackend::default()).unwrap();
}
