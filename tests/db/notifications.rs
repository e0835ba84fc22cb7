use super::run_test;
use chrono::{Duration, FixedOffset, TimeZone, Utc};
use remindbot::db::Connection;

#[test]
fn overdue_rows_stay_due() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        // A reminder a month overdue is still delivered, not dropped.
        let long_ago = (Utc::now() - Duration::days(30)).fixed_offset();
        let id = conn
            .create_notification(42, "buy milk", &long_ago)
            .await
            .unwrap();

        let due = conn.notifications_due(&Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].recipient_id, 42);
        assert_eq!(due[0].text, "buy milk");
        assert!(!due[0].is_sent);
    });
}

#[test]
fn due_then_sent_then_quiet() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let now = Utc::now();
        let at = (now - Duration::minutes(5)).fixed_offset();
        let id = conn.create_notification(42, "buy milk", &at).await.unwrap();

        let due = conn.notifications_due(&now).await.unwrap();
        assert_eq!(due.iter().map(|n| n.id).collect::<Vec<_>>(), vec![id]);

        assert!(conn.mark_sent(id).await.unwrap());

        let later = now + Duration::minutes(1);
        assert!(conn.notifications_due(&later).await.unwrap().is_empty());
    });
}

#[test]
fn future_rows_are_not_due() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let soon = (Utc::now() + Duration::minutes(2)).fixed_offset();
        conn.create_notification(42, "too early", &soon)
            .await
            .unwrap();
        assert!(conn.notifications_due(&Utc::now()).await.unwrap().is_empty());
    });
}

#[test]
fn due_ordering_is_earliest_first_with_id_tiebreak() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let now = Utc::now();
        let older = (now - Duration::hours(2)).fixed_offset();
        let newer = (now - Duration::minutes(5)).fixed_offset();
        let b = conn.create_notification(1, "second", &newer).await.unwrap();
        let a = conn.create_notification(1, "first", &older).await.unwrap();
        let c = conn
            .create_notification(1, "second bis", &newer)
            .await
            .unwrap();

        let due = conn.notifications_due(&now).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    });
}

#[test]
fn mark_sent_transitions_at_most_once() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let at = (Utc::now() - Duration::minutes(1)).fixed_offset();
        let id = conn.create_notification(7, "once", &at).await.unwrap();

        assert!(conn.mark_sent(id).await.unwrap());
        assert!(!conn.mark_sent(id).await.unwrap());
        assert!(!conn.mark_sent(id + 1000).await.unwrap());
    });
}

#[test]
fn concurrent_mark_sent_has_exactly_one_winner() {
    run_test(|pool| async move {
        let mut setup = pool.connection().await.unwrap();
        let at = (Utc::now() - Duration::minutes(1)).fixed_offset();
        let id = setup.create_notification(100, "race", &at).await.unwrap();

        let mut c1 = pool.connection().await.unwrap();
        let mut c2 = pool.connection().await.unwrap();
        let (a, b) = tokio::join!(c1.mark_sent(id), c2.mark_sent(id));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a ^ b, "exactly one marker must win, got {a} and {b}");

        let rows = setup.notifications_for_recipient(100, true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_sent);
    });
}

#[test]
fn scheduled_time_round_trips_through_the_store() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let zone = FixedOffset::east_opt(3 * 3600).unwrap();
        let at = zone.with_ymd_and_hms(2025, 6, 1, 10, 30, 0).unwrap();
        let id = conn.create_notification(5, "round trip", &at).await.unwrap();

        let rows = conn.notifications_for_recipient(5, false).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].scheduled_at.instant().unwrap(), at);
        assert_eq!(rows[0].scheduled_at.to_stored(), "2025-06-01T10:30:00+03:00");
    });
}

#[test]
fn fix_timezone_rewrites_the_rendering_not_the_instant() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let at = utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let id = conn.create_notification(5, "shift me", &at).await.unwrap();

        let moscow = FixedOffset::east_opt(3 * 3600).unwrap();
        assert!(conn
            .fix_timezone(id, &at.with_timezone(&moscow))
            .await
            .unwrap());
        assert!(!conn
            .fix_timezone(id + 1000, &at.with_timezone(&moscow))
            .await
            .unwrap());

        let rows = conn.notifications_for_recipient(5, false).await.unwrap();
        assert_eq!(rows[0].scheduled_at.instant().unwrap(), at);
        assert_eq!(rows[0].scheduled_at.to_stored(), "2025-03-10T12:00:00+03:00");
    });
}

#[test]
fn cancelled_rows_disappear_from_views() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let at = (Utc::now() - Duration::minutes(1)).fixed_offset();
        let id = conn.create_notification(6, "never mind", &at).await.unwrap();

        assert!(conn.cancel_notification(id).await.unwrap());
        // Already cancelled; a second cancel is a no-op.
        assert!(!conn.cancel_notification(id).await.unwrap());

        assert!(conn.notifications_due(&Utc::now()).await.unwrap().is_empty());
        assert!(conn
            .notifications_for_recipient(6, true)
            .await
            .unwrap()
            .is_empty());
        assert!(conn.active_notifications().await.unwrap().is_empty());
    });
}

#[test]
fn deactivated_recipients_are_skipped_until_they_return() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        conn.record_recipient(9, "gone_user").await.unwrap();
        let at = (Utc::now() - Duration::minutes(3)).fixed_offset();
        let id = conn.create_notification(9, "knock knock", &at).await.unwrap();

        conn.deactivate_recipient(9).await.unwrap();
        assert!(conn.notifications_due(&Utc::now()).await.unwrap().is_empty());

        // The row was held back, not consumed: re-recording the recipient
        // (e.g. they unblocked the bot and said /start) revives it.
        conn.record_recipient(9, "gone_user").await.unwrap();
        let due = conn.notifications_due(&Utc::now()).await.unwrap();
        assert_eq!(due.iter().map(|n| n.id).collect::<Vec<_>>(), vec![id]);
        assert!(!due[0].is_sent);
    });
}

#[test]
fn unknown_recipients_are_still_delivered_to() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let at = (Utc::now() - Duration::minutes(1)).fixed_offset();
        // No record_recipient call: the conversational layer owns that table
        // and may not have written it yet.
        conn.create_notification(12345, "hello stranger", &at)
            .await
            .unwrap();
        assert_eq!(conn.notifications_due(&Utc::now()).await.unwrap().len(), 1);
    });
}

#[test]
fn unreachable_bookkeeping() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        conn.record_recipient(3, "flaky").await.unwrap();

        assert_eq!(conn.record_unreachable(3).await.unwrap(), 1);
        assert_eq!(conn.record_unreachable(3).await.unwrap(), 2);
        // Counting works even for recipients nobody recorded.
        assert_eq!(conn.record_unreachable(777).await.unwrap(), 1);

        conn.clear_unreachable(3).await.unwrap();
        let recipient = conn.get_recipient(3).await.unwrap().unwrap();
        assert_eq!(recipient.unreachable_count, 0);
        assert!(recipient.is_active);
        assert_eq!(recipient.username, "flaky");

        assert!(conn.get_recipient(99999).await.unwrap().is_none());
    });
}

#[test]
fn listing_respects_the_include_sent_flag() {
    run_test(|pool| async move {
        let mut conn = pool.connection().await.unwrap();
        let at = (Utc::now() - Duration::minutes(10)).fixed_offset();
        let sent = conn.create_notification(8, "done", &at).await.unwrap();
        let pending = conn.create_notification(8, "todo", &at).await.unwrap();
        conn.mark_sent(sent).await.unwrap();

        let only_pending = conn.notifications_for_recipient(8, false).await.unwrap();
        assert_eq!(
            only_pending.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![pending]
        );

        let everything = conn.notifications_for_recipient(8, true).await.unwrap();
        assert_eq!(everything.len(), 2);
    });
}
