//! Integration tests: commands through the service, published envelopes
//! fed to the projection, read model asserted.

use domain::{
    Aggregate, CancelOrder, CreateOrder, CustomerId, Money, OrderItem, OrderService, OrderStatus,
    PayOrder, ShipOrder,
};
use event_store::{EventEnvelope, InMemoryEventStore, Version};
use projections::{ApplyOutcome, InMemoryReadModelStore, OrderProjection, ReadModelStore};
use publisher::{HighWaterMarks, InMemoryEventPublisher, OutboxSweeper};

type Service = OrderService<InMemoryEventStore, InMemoryEventPublisher>;

fn setup() -> (Service, InMemoryEventPublisher, OrderProjection<InMemoryReadModelStore>) {
    let store = InMemoryEventStore::new();
    let publisher = InMemoryEventPublisher::new();
    let service = OrderService::new(store, publisher.clone());
    let projection = OrderProjection::new(InMemoryReadModelStore::new());
    (service, publisher, projection)
}

async fn project_all(
    projection: &OrderProjection<InMemoryReadModelStore>,
    envelopes: &[EventEnvelope],
) {
    for envelope in envelopes {
        projection.handle(envelope).await.unwrap();
    }
}

fn one_widget_order() -> CreateOrder {
    CreateOrder::new(
        CustomerId::new(),
        vec![OrderItem::new(
            "SKU-001",
            "Widget",
            2,
            Money::from_cents(1000),
        )],
        "A",
    )
}

#[tokio::test]
async fn create_pay_ship_reaches_the_read_model() {
    let (service, publisher, projection) = setup();

    let created = service.create_order(one_widget_order()).await.unwrap();
    let order_id = created.aggregate.id().unwrap();
    service
        .pay_order(PayOrder::new(order_id, "PAY-1", Money::from_cents(2000), "card"))
        .await
        .unwrap();
    service
        .ship_order(ShipOrder::new(order_id, "SHP-1", "TRK-1"))
        .await
        .unwrap();

    project_all(&projection, &publisher.published().await).await;

    let store = projection.store();
    let order = store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.tracking_number.as_deref(), Some("TRK-1"));
    assert_eq!(order.total_amount.cents(), 2000);
    assert_eq!(order.version, Version::new(2));

    let items = store.get_items(order_id).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 2);

    // Three history rows, in timestamp order.
    let history = store.get_history(order_id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        [OrderStatus::Created, OrderStatus::Paid, OrderStatus::Shipped]
    );
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn cancelled_order_carries_reason_and_refund() {
    let (service, publisher, projection) = setup();

    let created = service.create_order(one_widget_order()).await.unwrap();
    let order_id = created.aggregate.id().unwrap();
    service
        .pay_order(PayOrder::new(order_id, "PAY-1", Money::from_cents(2000), "card"))
        .await
        .unwrap();
    service
        .cancel_order(CancelOrder::new(order_id, "fraud"))
        .await
        .unwrap();

    let published = publisher.published().await;
    assert_eq!(published.last().unwrap().payload["data"]["refund_required"], true);

    project_all(&projection, &published).await;

    let store = projection.store();
    let order = store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let history = store.get_history(order_id).await.unwrap();
    assert_eq!(history.last().unwrap().reason.as_deref(), Some("fraud"));
}

#[tokio::test]
async fn paid_delivered_before_created_parks_and_recovers() {
    let (service, publisher, projection) = setup();

    let created = service.create_order(one_widget_order()).await.unwrap();
    let order_id = created.aggregate.id().unwrap();
    service
        .pay_order(PayOrder::new(order_id, "PAY-1", Money::from_cents(2000), "card"))
        .await
        .unwrap();

    let published = publisher.published().await;
    let (create_env, paid_env) = (&published[0], &published[1]);

    // Paid (v1) arrives first: parked, no row yet.
    assert_eq!(
        projection.handle(paid_env).await.unwrap(),
        ApplyOutcome::Parked
    );
    assert!(projection.store().get_order(order_id).await.unwrap().is_none());

    // Created (v0) closes the gap: both apply.
    assert_eq!(
        projection.handle(create_env).await.unwrap(),
        ApplyOutcome::Applied { drained: 1 }
    );

    let order = projection.store().get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.version, Version::new(1));

    // No duplicate history rows.
    let history = projection.store().get_history(order_id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn double_delivery_changes_nothing() {
    let (service, publisher, projection) = setup();

    let created = service.create_order(one_widget_order()).await.unwrap();
    let order_id = created.aggregate.id().unwrap();
    service
        .pay_order(PayOrder::new(order_id, "PAY-1", Money::from_cents(2000), "card"))
        .await
        .unwrap();

    let published = publisher.published().await;
    project_all(&projection, &published).await;
    let first_pass = projection.store().get_order(order_id).await.unwrap().unwrap();
    let first_history = projection.store().get_history(order_id).await.unwrap();

    // The whole stream again: every event is a duplicate.
    for envelope in &published {
        assert_eq!(
            projection.handle(envelope).await.unwrap(),
            ApplyOutcome::Duplicate
        );
    }

    let second_pass = projection.store().get_order(order_id).await.unwrap().unwrap();
    assert_eq!(first_pass, second_pass);
    assert_eq!(
        first_history,
        projection.store().get_history(order_id).await.unwrap()
    );
}

#[tokio::test]
async fn interleaving_distinct_aggregates_is_order_insensitive() {
    let (service, publisher, projection) = setup();

    // Two orders, each create+pay+ship.
    let mut order_ids = Vec::new();
    for _ in 0..2 {
        let created = service.create_order(one_widget_order()).await.unwrap();
        let order_id = created.aggregate.id().unwrap();
        service
            .pay_order(PayOrder::new(order_id, "PAY", Money::from_cents(2000), "card"))
            .await
            .unwrap();
        service
            .ship_order(ShipOrder::new(order_id, "SHP", "TRK"))
            .await
            .unwrap();
        order_ids.push(order_id);
    }

    let published = publisher.published().await;

    // Natural global order on one projection.
    project_all(&projection, &published).await;

    // A permutation preserving each aggregate's own order on another:
    // all of order B first, then all of order A.
    let permuted: Vec<_> = published
        .iter()
        .filter(|e| e.aggregate_id == order_ids[1])
        .chain(published.iter().filter(|e| e.aggregate_id == order_ids[0]))
        .cloned()
        .collect();
    let other = OrderProjection::new(InMemoryReadModelStore::new());
    project_all(&other, &permuted).await;

    for order_id in order_ids {
        let a = projection.store().get_order(order_id).await.unwrap().unwrap();
        let b = other.store().get_order(order_id).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(
            projection.store().get_history(order_id).await.unwrap(),
            other.store().get_history(order_id).await.unwrap()
        );
    }
}

#[tokio::test]
async fn sweeper_recovers_store_ahead_of_publisher() {
    let store = InMemoryEventStore::new();
    let marks = HighWaterMarks::new();
    let publisher = InMemoryEventPublisher::with_marks(marks.clone());
    let service = OrderService::new(store.clone(), publisher.clone());
    let projection = OrderProjection::new(InMemoryReadModelStore::new());

    let created = service.create_order(one_widget_order()).await.unwrap();
    let order_id = created.aggregate.id().unwrap();

    // The pay command appends but its publish fails: store is ahead.
    publisher.fail_next(1);
    service
        .pay_order(PayOrder::new(order_id, "PAY-1", Money::from_cents(2000), "card"))
        .await
        .unwrap_err();
    assert_eq!(publisher.published_count().await, 1);

    // The sweep republishes the missing Paid event.
    let sweeper = OutboxSweeper::new(store, publisher.clone(), marks);
    assert_eq!(sweeper.sweep().await.unwrap(), 1);

    project_all(&projection, &publisher.published().await).await;
    let order = projection.store().get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.version, Version::new(1));

    // A second sweep finds nothing new.
    let store2 = service.handler().store().clone();
    let sweeper = OutboxSweeper::new(store2, publisher.clone(), publisher.marks());
    assert_eq!(sweeper.sweep().await.unwrap(), 0);
}
