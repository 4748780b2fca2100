mod common;

use docrepo::prelude::*;

use common::{Customer, context};

#[tokio::test]
async fn bulk_mode_defers_writes_until_submitted() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    customers.begin_bulk_operation().unwrap();
    assert!(customers.is_bulk_mode());

    let mut alice = Customer::new("Alice", 30);
    let mut bob = Customer::new("Bob", 25);
    customers.add(&mut alice).await.unwrap();
    customers.add(&mut bob).await.unwrap();
    customers.set_field(&alice, "age", 31).await.unwrap();
    customers.delete(&bob).await.unwrap();

    // identifiers are assigned when queued
    assert_ne!(alice.id, 0);
    assert_eq!(customers.pending_operations(), 4);
    assert_eq!(customers.count(Filter::all()).await.unwrap(), 0);

    let result = customers.do_bulk_operation(BulkWriteOptions::default()).await.unwrap();

    assert!(!customers.is_bulk_mode());
    assert_eq!(result.inserted, 2);
    assert_eq!(result.deleted, 1);
    assert_eq!(customers.get_all(Filter::all()).await.unwrap(), vec![Customer { age: 31, ..alice }]);
}

#[tokio::test]
async fn bulk_mode_cannot_be_reentered() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    customers.begin_bulk_operation().unwrap();

    assert!(matches!(
        customers.begin_bulk_operation(),
        Err(DocumentStoreError::BulkOperationAlreadyActive)
    ));
}

#[tokio::test]
async fn submitting_without_bulk_mode_fails() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    assert!(matches!(
        customers.do_bulk_operation(BulkWriteOptions::default()).await,
        Err(DocumentStoreError::NoActiveBulkOperation)
    ));
}

#[tokio::test]
async fn empty_batch_succeeds_and_leaves_bulk_mode() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    customers.begin_bulk_operation().unwrap();
    let result = customers.do_bulk_operation(BulkWriteOptions::default()).await.unwrap();

    assert!(result.acknowledged);
    assert!(!customers.is_bulk_mode());
}

#[tokio::test]
async fn failed_submission_still_leaves_bulk_mode() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    let mut existing = Customer { id: 5, ..Customer::new("Alice", 30) };
    customers.add(&mut existing).await.unwrap();

    customers.begin_bulk_operation().unwrap();
    let mut fresh = Customer::new("Bob", 25);
    let mut clash = Customer { id: 5, ..Customer::new("Carol", 35) };
    customers.add(&mut fresh).await.unwrap();
    customers.add(&mut clash).await.unwrap();

    let err = customers
        .do_bulk_operation(BulkWriteOptions::default())
        .await
        .unwrap_err();

    let DocumentStoreError::BulkWrite(failures) = err else {
        panic!("expected a bulk write failure");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert!(!customers.is_bulk_mode());

    // the next write executes immediately
    let mut dave = Customer::new("Dave", 41);
    customers.add(&mut dave).await.unwrap();
    assert_eq!(customers.count(Filter::all()).await.unwrap(), 3);
}

#[tokio::test]
async fn with_bulk_operation_submits_on_success() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    let result = customers
        .with_bulk_operation(BulkWriteOptions::unordered(), async |customers| {
            let mut batch = vec![Customer::new("Alice", 30), Customer::new("Bob", 25)];
            customers.add_many(&mut batch).await?;
            customers.update_where(Filter::all(), UpdateDoc::new().inc("age", 1)).await
        })
        .await
        .unwrap();

    assert_eq!(result.inserted, 2);
    assert_eq!(result.modified, 2);
    assert!(!customers.is_bulk_mode());
    assert_eq!(customers.count(Filter::gte("age", 26)).await.unwrap(), 2);
}

#[tokio::test]
async fn with_bulk_operation_discards_batch_on_failure() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    let result = customers
        .with_bulk_operation(BulkWriteOptions::default(), async |customers| {
            let mut alice = Customer::new("Alice", 30);
            customers.add(&mut alice).await?;
            customers.begin_bulk_operation()
        })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::BulkOperationAlreadyActive)));
    assert!(!customers.is_bulk_mode());
    assert_eq!(customers.count(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn discard_drops_pending_operations() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    customers.begin_bulk_operation().unwrap();
    customers.delete_all().await.unwrap();
    customers.delete_where(Filter::eq("name", "x")).await.unwrap();

    assert_eq!(customers.discard_bulk_operation(), 2);
    assert!(!customers.is_bulk_mode());
    assert_eq!(customers.pending_operations(), 0);
}

#[tokio::test]
async fn bulk_writes_join_the_active_transaction() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    context.begin_transaction(None, None).await.unwrap();

    customers.begin_bulk_operation().unwrap();
    let mut alice = Customer::new("Alice", 30);
    customers.add(&mut alice).await.unwrap();
    customers.do_bulk_operation(BulkWriteOptions::default()).await.unwrap();

    context.rollback_transaction().await.unwrap();

    assert_eq!(customers.count(Filter::all()).await.unwrap(), 0);
}
