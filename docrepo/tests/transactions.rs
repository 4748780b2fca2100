mod common;

use std::time::Duration;

use docrepo::prelude::*;

use common::{Customer, context};

#[tokio::test]
async fn begin_twice_fails_and_leaves_first_transaction_intact() {
    let context = context();

    context.begin_transaction(None, None).await.unwrap();
    assert!(matches!(
        context.begin_transaction(None, None).await,
        Err(DocumentStoreError::TransactionAlreadyActive)
    ));
    assert!(context.has_active_transaction().await);

    context.commit_transaction().await.unwrap();
    assert!(!context.has_active_transaction().await);
}

#[tokio::test]
async fn commit_or_rollback_without_transaction_fails() {
    let context = context();

    assert!(matches!(
        context.commit_transaction().await,
        Err(DocumentStoreError::NoActiveTransaction)
    ));
    assert!(matches!(
        context.rollback_transaction().await,
        Err(DocumentStoreError::NoActiveTransaction)
    ));
}

#[tokio::test]
async fn rollback_discards_writes() {
    let context = context();
    let mut customers = context.repository::<Customer>().unwrap();

    let mut alice = Customer::new("Alice", 30);
    customers.add(&mut alice).await.unwrap();

    context.begin_transaction(None, None).await.unwrap();

    let mut bob = Customer::new("Bob", 25);
    customers.add(&mut bob).await.unwrap();
    customers.delete(&alice).await.unwrap();
    assert_eq!(customers.count(Filter::all()).await.unwrap(), 1);

    context.rollback_transaction().await.unwrap();

    assert_eq!(customers.get_all(Filter::all()).await.unwrap(), vec![alice]);
}

#[tokio::test]
async fn commit_publishes_writes() {
    let context = context();
    let observer = DocumentContext::new(context.backend().clone());
    let other = observer.repository::<Customer>().unwrap();

    context.begin_transaction(None, None).await.unwrap();

    let mut customers = context.repository::<Customer>().unwrap();
    let mut carol = Customer::new("Carol", 35);
    customers.add(&mut carol).await.unwrap();

    assert_eq!(other.count(Filter::all()).await.unwrap(), 0);

    context.commit_transaction().await.unwrap();

    assert_eq!(other.count(Filter::all()).await.unwrap(), 1);
    assert_eq!(other.get_by_id(&carol.id).await.unwrap(), Some(carol));
}

#[tokio::test]
async fn commit_keeps_writes_made_outside_the_transaction() {
    let context = context();
    let outsider = DocumentContext::new(context.backend().clone());

    context.begin_transaction(None, None).await.unwrap();
    let mut inside = context.repository::<Customer>().unwrap();
    let mut grace = Customer::new("Grace", 28);
    inside.add(&mut grace).await.unwrap();

    let mut outside = outsider.repository::<Customer>().unwrap();
    let mut heidi = Customer::new("Heidi", 33);
    outside.add(&mut heidi).await.unwrap();
    outside
        .create_ascending_index("name", IndexOptions::default())
        .await
        .unwrap();

    context.commit_transaction().await.unwrap();

    let mut names: Vec<String> = outside
        .get_all(Filter::all())
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Grace", "Heidi"]);
    assert_eq!(outside.get_index_names().await.unwrap(), vec!["_id_", "name_1"]);
}

#[tokio::test]
async fn with_transaction_commits_on_success() {
    let context = context();

    let id = context
        .with_transaction(None, None, async || {
            let mut customers = context.repository::<Customer>()?;
            let mut dave = Customer::new("Dave", 41);
            customers.add(&mut dave).await?;
            Ok(dave.id)
        })
        .await
        .unwrap();

    assert!(!context.has_active_transaction().await);

    let customers = context.repository::<Customer>().unwrap();
    assert!(customers.get_by_id(&id).await.unwrap().is_some());
}

#[tokio::test]
async fn with_transaction_rolls_back_on_failure() {
    let context = context();

    let result: DocumentStoreResult<()> = context
        .with_transaction(None, None, async || {
            let mut customers = context.repository::<Customer>()?;
            let mut eve = Customer::new("Eve", 19);
            customers.add(&mut eve).await?;
            customers.first(Filter::eq("name", "Nobody")).await?;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(DocumentStoreError::NoMatchingDocument(_))));
    assert!(!context.has_active_transaction().await);

    let customers = context.repository::<Customer>().unwrap();
    assert_eq!(customers.count(Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn sessions_can_be_shared_between_contexts() {
    let first = context();
    let store = first.backend().clone();
    let second = DocumentContext::new(store);

    let session = first.begin_transaction(None, None).await.unwrap();
    assert!(second.use_transaction(session.clone()).await.is_none());
    assert_eq!(second.current_session().await, Some(session));

    let mut customers = second.repository::<Customer>().unwrap();
    let mut frank = Customer::new("Frank", 50);
    customers.add(&mut frank).await.unwrap();

    first.commit_transaction().await.unwrap();

    let outside = first.repository::<Customer>().unwrap();
    assert_eq!(outside.count(Filter::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn cancelled_context_short_circuits_operations() {
    let token = CancellationToken::new();
    let context = context().with_cancellation(token.clone());
    let customers = context.repository::<Customer>().unwrap();

    token.cancel();

    assert!(matches!(
        customers.count(Filter::all()).await,
        Err(DocumentStoreError::Cancelled)
    ));
    assert!(matches!(
        context.begin_transaction(None, None).await,
        Err(DocumentStoreError::Cancelled)
    ));
    assert!(!context.has_active_transaction().await);
}

#[tokio::test]
async fn transaction_options_are_accepted() {
    let context = context();
    let options = TransactionOptions {
        majority_write: true,
        max_commit_time: Some(Duration::from_secs(5)),
    };

    context
        .begin_transaction(Some(SessionOptions { causal_consistency: Some(true) }), Some(options))
        .await
        .unwrap();
    context.rollback_transaction().await.unwrap();
}
