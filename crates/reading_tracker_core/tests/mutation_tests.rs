mod common;

use common::*;
use reading_tracker_core::*;
use serde_json::json;

fn dune_draft() -> BookDraft {
    BookDraft::titled("  Dune ")
}

fn seed_shelf(harness: &Harness) {
    harness.store.seed(
        "reader-1",
        CollectionKind::Books,
        ["A", "B", "C", "D"]
            .iter()
            .enumerate()
            .map(|(i, id)| json!({"id": id, "title": format!("Book {}", id), "order": i}))
            .collect(),
    );
}

#[tokio::test]
async fn created_book_is_published_with_generated_id_and_highest_order() {
    let harness = Harness::new();
    let far_future = harness.clock.now.timestamp_millis() + 10_000;
    harness.store.seed(
        "reader-1",
        CollectionKind::Books,
        vec![json!({"id": "old", "title": "Old", "order": far_future})],
    );
    let library = harness.signed_in().await;
    let mut books = library.books();
    published(&mut books, |b| b.len() == 1).await;
    library.set_online(false);

    let outcome = library.mutations().save_book(None, dune_draft()).await.unwrap();

    let WriteOutcome::SavedOffline(id) = outcome else {
        panic!("expected an offline save, got {:?}", outcome);
    };
    let all = published(&mut books, |b| b.len() == 2).await;
    let dune = all.iter().find(|b| b.id == id).unwrap();
    assert_eq!(dune.title, "Dune");
    assert_eq!(dune.author, "");
    assert_eq!(dune.genre, "");
    assert_eq!(dune.rating, 5);
    assert_eq!(dune.order, far_future + 1);
    assert_eq!(dune.date_added, Some(harness.clock.today));
    assert_eq!(all.last().unwrap().id, id);
    // Offline: no enrichment lookup.
    assert_eq!(harness.lookup.calls(), 0);
}

#[tokio::test]
async fn online_creation_fills_blank_fields_from_the_lookup() {
    let harness = Harness::new();
    let library = harness.signed_in().await;

    let outcome = library.mutations().save_book(None, dune_draft()).await.unwrap();
    let WriteOutcome::Saved(id) = outcome else {
        panic!("expected an online save, got {:?}", outcome);
    };

    let stored: Book =
        serde_json::from_value(harness.store.document("reader-1", CollectionKind::Books, &id).unwrap()).unwrap();
    assert_eq!(stored.author, "Frank Herbert");
    assert_eq!(stored.genre, "Science Fiction");
    assert_eq!(stored.page_count, Some(412));
    assert!(stored.cover_url.is_some());
    assert_eq!(stored.order, harness.clock.now.timestamp_millis());
    assert_eq!(harness.lookup.queries(), ["Dune"]);
}

#[tokio::test]
async fn updating_merges_the_form_over_the_stored_book() {
    let harness = Harness::new();
    harness.store.seed(
        "reader-1",
        CollectionKind::Books,
        vec![json!({"id": "x", "title": "Dnue", "order": 3, "dateAdded": "2024-01-01"})],
    );
    let library = harness.signed_in().await;

    let draft = BookDraft {
        author: Some("Frank Herbert".to_string()),
        rating: Some(4),
        ..BookDraft::titled("Dune")
    };
    let outcome = library.mutations().save_book(Some("x"), draft).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Saved("x".to_string()));
    let stored = harness.store.document("reader-1", CollectionKind::Books, "x").unwrap();
    assert_eq!(stored["title"], "Dune");
    assert_eq!(stored["rating"], 4);
    assert_eq!(stored["order"], 3);
    assert_eq!(stored["dateAdded"], "2024-01-01");
    // Edits never trigger a lookup.
    assert_eq!(harness.lookup.calls(), 0);
}

#[tokio::test]
async fn updating_one_field_keeps_the_others() {
    let harness = Harness::new();
    harness.store.seed(
        "reader-1",
        CollectionKind::Books,
        vec![json!({
            "id": "b1", "title": "Old title", "author": "Frank Herbert", "rating": 2,
            "isFavorite": true, "color": "navy", "coverUrl": "https://covers/b1.jpg", "order": 3
        })],
    );
    let library = harness.signed_in().await;

    // The same form the book dialog sends when only the title changed.
    let draft: BookDraft = serde_json::from_value(json!({"title": "New title"})).unwrap();
    let outcome = library.mutations().save_book(Some("b1"), draft).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Saved("b1".to_string()));
    let stored = harness.store.document("reader-1", CollectionKind::Books, "b1").unwrap();
    assert_eq!(stored["title"], "New title");
    assert_eq!(stored["author"], "Frank Herbert");
    assert_eq!(stored["rating"], 2);
    assert_eq!(stored["isFavorite"], true);
    assert_eq!(stored["color"], "navy");
    assert_eq!(stored["coverUrl"], "https://covers/b1.jpg");
    assert_eq!(stored["order"], 3);
}

#[tokio::test]
async fn an_empty_update_writes_nothing() {
    let harness = Harness::new();
    seed_shelf(&harness);
    let library = harness.signed_in().await;

    let outcome = library.mutations().save_book(Some("A"), BookDraft::default()).await.unwrap();

    assert_eq!(outcome, WriteOutcome::Skipped);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn invalid_drafts_are_rejected_before_any_write() {
    let harness = Harness::new();
    let library = harness.signed_in().await;
    let gateway = library.mutations();

    assert!(matches!(
        gateway.save_book(None, BookDraft::titled("   ")).await,
        Err(MutationError::Validation(ValidationError::MissingTitle))
    ));
    assert!(matches!(
        gateway.save_book(None, BookDraft::default()).await,
        Err(MutationError::Validation(ValidationError::MissingTitle))
    ));
    assert!(matches!(
        gateway.save_book(Some("A"), BookDraft::titled("")).await,
        Err(MutationError::Validation(ValidationError::MissingTitle))
    ));
    let unrated = BookDraft {
        rating: Some(0),
        ..dune_draft()
    };
    assert!(matches!(
        gateway.save_book(None, unrated).await,
        Err(MutationError::Validation(ValidationError::InvalidRating(0)))
    ));
    let overrated = BookDraft {
        rating: Some(6),
        ..BookDraft::default()
    };
    assert!(matches!(
        gateway.save_book(Some("A"), overrated).await,
        Err(MutationError::Validation(ValidationError::InvalidRating(6)))
    ));
    let no_book = SessionDraft {
        duration: "20".to_string(),
        ..SessionDraft::default()
    };
    assert!(matches!(
        gateway.create_session(no_book).await,
        Err(MutationError::Validation(ValidationError::MissingBook))
    ));
    let bad_minutes = SessionDraft {
        book_id: Some("A".to_string()),
        duration: "twenty".to_string(),
        note: String::new(),
    };
    assert!(matches!(
        gateway.create_session(bad_minutes).await,
        Err(MutationError::Validation(ValidationError::InvalidDuration(_)))
    ));

    assert_eq!(harness.store.writes(), 0);
    assert_eq!(harness.lookup.calls(), 0);
}

#[tokio::test]
async fn without_a_user_everything_is_skipped() {
    let harness = Harness::new();
    seed_shelf(&harness);
    let library = harness.library();
    let gateway = library.mutations();

    let blank = BookDraft::default();
    assert_eq!(gateway.save_book(None, blank).await.unwrap(), WriteOutcome::Skipped);
    assert_eq!(gateway.create_session(SessionDraft::default()).await.unwrap(), WriteOutcome::Skipped);
    assert_eq!(gateway.delete_book("A").await, WriteOutcome::Skipped);
    assert_eq!(gateway.toggle_favorite("A").await, WriteOutcome::Skipped);
    assert_eq!(gateway.reorder("A", "C").await, WriteOutcome::Skipped);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn write_failures_surface_for_saves() {
    let harness = Harness::new();
    let library = harness.signed_in().await;
    harness.store.fail_writes(true);
    library.set_online(false);

    let result = library.mutations().save_book(None, dune_draft()).await;

    assert!(matches!(result, Err(MutationError::Write(PortError::Unavailable(_)))));
}

#[tokio::test]
async fn reorder_is_published_before_the_store_confirms() {
    let harness = Harness::new();
    seed_shelf(&harness);
    let library = harness.signed_in().await;
    let mut books = library.books();
    published(&mut books, |b| b.len() == 4).await;
    // Keep the store from confirming anything.
    harness.store.fail_writes(true);

    let outcome = library.reorder("A", "C").await;

    assert_eq!(
        outcome,
        WriteOutcome::Saved(vec!["B".to_string(), "C".to_string(), "A".to_string(), "D".to_string()])
    );
    let now = library.books().peek();
    let order: Vec<(&str, i64)> = now.iter().map(|b| (b.id.as_str(), b.order)).collect();
    assert_eq!(order, [("B", 0), ("C", 1), ("A", 2), ("D", 3)]);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn reorder_writes_every_position() {
    let harness = Harness::new();
    seed_shelf(&harness);
    let library = harness.signed_in().await;
    let mut books = library.books();
    published(&mut books, |b| b.len() == 4).await;

    library.reorder("D", "A").await;

    let store = harness.store.clone();
    eventually("four order writes", || store.writes() == 4).await;
    let stored = harness.store.document("reader-1", CollectionKind::Books, "D").unwrap();
    assert_eq!(stored["order"], 0);
    let stored = harness.store.document("reader-1", CollectionKind::Books, "C").unwrap();
    assert_eq!(stored["order"], 3);
}

#[tokio::test]
async fn favorite_toggles_against_the_published_book() {
    let harness = Harness::new();
    seed_shelf(&harness);
    let library = harness.signed_in().await;
    let mut books = library.books();
    published(&mut books, |b| b.len() == 4).await;

    assert_eq!(library.mutations().toggle_favorite("B").await, WriteOutcome::Saved(true));
    published(&mut books, |b| b.iter().any(|book| book.id == "B" && book.is_favorite)).await;
    assert_eq!(library.mutations().toggle_favorite("B").await, WriteOutcome::Saved(false));
    assert_eq!(library.mutations().toggle_favorite("nope").await, WriteOutcome::Skipped);
}

#[tokio::test]
async fn deleting_a_book_keeps_its_sessions() {
    let harness = Harness::new();
    seed_shelf(&harness);
    harness.store.seed(
        "reader-1",
        CollectionKind::Sessions,
        vec![json!({"id": "s1", "bookId": "A", "bookTitle": "Book A", "date": "2024-03-14", "duration": 10})],
    );
    let library = harness.signed_in().await;
    let mut books = library.books();
    published(&mut books, |b| b.len() == 4).await;

    assert_eq!(library.mutations().delete_book("A").await, WriteOutcome::Saved(()));

    published(&mut books, |b| b.len() == 3).await;
    let journal = library.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].book_title, "Book A");
}

#[tokio::test]
async fn first_session_of_the_day_is_celebrated() {
    let harness = Harness::new();
    seed_shelf(&harness);
    let library = harness.signed_in().await;
    let mut books = library.books();
    published(&mut books, |b| b.len() == 4).await;
    let mut notices = library.notices();

    let draft = SessionDraft {
        book_id: Some("C".to_string()),
        duration: " 45 ".to_string(),
        note: "great chapter".to_string(),
    };
    let outcome = library.log_session(draft.clone()).await.unwrap();

    let receipt = outcome.value().unwrap().clone();
    assert!(receipt.first_today);
    assert_eq!(receipt.session.book_title, "Book C");
    assert_eq!(receipt.session.duration_minutes, 45);
    assert_eq!(receipt.session.date, harness.clock.today);
    assert_eq!(notices.try_recv().unwrap(), Notice::StreakCelebration);

    let mut sessions = library.sessions();
    published(&mut sessions, |s| s.len() == 1).await;
    let second = library.log_session(draft).await.unwrap();
    assert!(!second.value().unwrap().first_today);
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn session_for_an_unknown_book_uses_the_fallback_title() {
    let harness = Harness::new();
    let library = harness.signed_in().await;

    let draft = SessionDraft {
        book_id: Some("gone".to_string()),
        duration: "15".to_string(),
        note: String::new(),
    };
    let outcome = library.mutations().create_session(draft).await.unwrap();

    assert_eq!(outcome.value().unwrap().session.book_title, "Book");
}
