use std::sync::mpsc::Receiver;
use std::sync::Arc;

use chrono::Utc;
use inkpad::ink::history::Durability;
use inkpad::ink::memory::{FixedMemorySampler, MemoryMonitor};
use inkpad::ink::{
    CommitOutcome, DrawingCoordinator, InkSignal, MemoryNoteStore, NoteStore, PenKind, RecordingSurface, Rect,
    Stroke, StrokePoint, ViewportTransformer,
};
use inkpad::InkSettings;

fn stroke(id: &str, note_id: &str, points: &[(f32, f32)]) -> Stroke {
    let points: Vec<StrokePoint> = points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| StrokePoint {
            x,
            y,
            pressure: 0.5,
            size: 1.0,
            tilt_x: 0,
            tilt_y: 0,
            timestamp_ms: i as i64,
            sequence: i as u32,
        })
        .collect();
    let bounds = Rect::bounding(points.iter().map(|p| (p.x, p.y))).unwrap_or_default();
    let now = Utc::now();
    Stroke {
        id: id.to_string(),
        note_id: note_id.to_string(),
        pen: PenKind::Ballpen,
        color: inkpad::ink::Color::BLACK,
        width: 2.0,
        bounds,
        created_at: now,
        updated_at: now,
        created_scroll_y: 0.0,
        points,
    }
}

fn session_with(store: Arc<MemoryNoteStore>, height: f32) -> DrawingCoordinator {
    session_with_settings(store, height, InkSettings::default())
}

fn session_with_settings(store: Arc<MemoryNoteStore>, height: f32, settings: InkSettings) -> DrawingCoordinator {
    let monitor = MemoryMonitor::new(Box::new(FixedMemorySampler::with_ratio(0.1)));
    DrawingCoordinator::with_monitor(store, ViewportTransformer::new(800.0, height), settings, monitor)
}

fn session() -> (DrawingCoordinator, Arc<MemoryNoteStore>) {
    let store = Arc::new(MemoryNoteStore::new());
    (session_with(Arc::clone(&store), 1000.0), store)
}

fn live_ids(session: &DrawingCoordinator, note_id: &str) -> Vec<String> {
    session.strokes_for(note_id).iter().map(|s| s.id.clone()).collect()
}

fn drain(rx: &Receiver<InkSignal>) -> Vec<InkSignal> {
    rx.try_iter().collect()
}

#[test]
fn committed_stroke_reaches_store_and_cache() {
    let (session, store) = session();
    session.open_note("n");
    let outcome = session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));

    assert!(matches!(
        outcome,
        CommitOutcome::Committed {
            sequence: 1,
            durability: Durability::Durable,
            ..
        }
    ));
    assert_eq!(store.stroke_ids("n"), vec!["a".to_string()]);
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string()]);
    assert!(session.can_undo("n"));
    assert!(!session.unsaved_changes());
}

#[test]
fn empty_stroke_is_a_no_op() {
    let (session, store) = session();
    session.open_note("n");
    assert_eq!(session.commit_stroke(stroke("a", "n", &[])), CommitOutcome::NoOp);
    assert!(store.stroke_ids("n").is_empty());
    assert!(!session.can_undo("n"));
}

#[test]
fn undo_and_redo_round_trip() {
    let (session, store) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));

    assert!(session.undo("n"));
    assert!(live_ids(&session, "n").is_empty());
    assert!(store.stroke_ids("n").is_empty());
    assert!(session.can_redo("n"));

    assert!(session.redo("n"));
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string()]);
    assert_eq!(store.stroke_ids("n"), vec!["a".to_string()]);
    assert!(!session.can_redo("n"));
}

#[test]
fn undo_on_empty_history_returns_false_without_signals() {
    let (session, _) = session();
    session.open_note("n");
    let rx = session.subscribe();
    assert!(!session.undo("n"));
    assert!(!session.redo("n"));
    assert!(drain(&rx).is_empty());
}

#[test]
fn new_action_after_undo_discards_redo_and_never_reuses_sequences() {
    let (session, _) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    session.commit_stroke(stroke("b", "n", &[(30.0, 30.0), (40.0, 40.0)]));
    assert!(session.undo("n"));
    session.commit_stroke(stroke("c", "n", &[(50.0, 50.0), (60.0, 60.0)]));

    assert!(!session.can_redo("n"));
    let sequences: Vec<u64> = session.history_actions("n").iter().map(|a| a.sequence).collect();
    assert_eq!(sequences, vec![1, 3]);
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string(), "c".to_string()]);
}

#[test]
fn undoing_an_erase_restores_the_stroke() {
    let (session, store) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(100.0, 100.0), (120.0, 100.0)]));
    session.commit_stroke(stroke("b", "n", &[(400.0, 400.0), (420.0, 400.0)]));

    let outcome = session.erase("n", &[(95.0, 95.0), (125.0, 105.0)]);
    assert!(outcome.is_committed());
    assert_eq!(live_ids(&session, "n"), vec!["b".to_string()]);
    assert_eq!(store.stroke_ids("n"), vec!["b".to_string()]);

    assert!(session.undo("n"));
    let mut ids = live_ids(&session, "n");
    ids.sort();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    assert!(store.stroke_ids("n").contains(&"a".to_string()));
}

#[test]
fn erase_without_hits_is_a_no_op() {
    let (session, _) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(100.0, 100.0), (120.0, 100.0)]));
    assert_eq!(session.erase("n", &[(600.0, 600.0)]), CommitOutcome::NoOp);
    assert_eq!(session.history_actions("n").len(), 1);
}

#[test]
fn move_is_undone_by_the_opposite_offset() {
    let (session, _) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));

    let outcome = session.move_strokes("n", &["a".to_string()], 100.0, 50.0);
    assert!(outcome.is_committed());
    assert_eq!(session.strokes_for("n")[0].bounds, Rect::new(110.0, 60.0, 120.0, 70.0));

    assert!(session.undo("n"));
    assert_eq!(session.strokes_for("n")[0].bounds, Rect::new(10.0, 10.0, 20.0, 20.0));
    assert_eq!(session.move_strokes("n", &["missing".to_string()], 5.0, 5.0), CommitOutcome::NoOp);
}

#[test]
fn inserted_page_pushes_later_strokes_down_and_undoes() {
    let store = Arc::new(MemoryNoteStore::new());
    let session = session_with(Arc::clone(&store), 3000.0);
    session.open_note("n");
    session.commit_stroke(stroke("top", "n", &[(10.0, 100.0), (20.0, 150.0)]));
    session.commit_stroke(stroke("lower", "n", &[(10.0, 1200.0), (20.0, 1250.0)]));
    let unit = session.with_viewport(|v| v.pagination().page_unit());
    let height_before = session.with_viewport(|v| v.document_height());

    assert!(session.insert_page("n", 2).is_committed());
    let strokes = session.strokes_for("n");
    let lower = strokes.iter().find(|s| s.id == "lower").unwrap();
    let top = strokes.iter().find(|s| s.id == "top").unwrap();
    assert!((lower.bounds.top - (1200.0 + unit)).abs() < 0.01);
    assert_eq!(top.bounds.top, 100.0);
    assert!((session.with_viewport(|v| v.document_height()) - (height_before + unit)).abs() < 0.01);

    assert!(session.undo("n"));
    let strokes = session.strokes_for("n");
    let lower = strokes.iter().find(|s| s.id == "lower").unwrap();
    assert!((lower.bounds.top - 1200.0).abs() < 0.01);

    assert_eq!(session.insert_page("n", 0), CommitOutcome::NoOp);
    assert_eq!(session.insert_page("n", 99), CommitOutcome::NoOp);
}

#[test]
fn failed_writes_mark_unsaved_and_flush_later() {
    let (session, store) = session();
    session.open_note("n");
    store.set_fail_writes(true);

    let outcome = session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    assert!(matches!(
        outcome,
        CommitOutcome::Committed {
            durability: Durability::NotDurable,
            ..
        }
    ));
    assert!(session.unsaved_changes());
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string()]);
    assert!(store.stroke_ids("n").is_empty());
    assert!(!session.flush_pending());

    store.set_fail_writes(false);
    assert!(session.flush_pending());
    assert!(!session.unsaved_changes());
    assert_eq!(store.stroke_ids("n"), vec!["a".to_string()]);
    assert_eq!(store.max_sequence("n").unwrap(), Some(1));
}

#[test]
fn writes_after_an_outage_queue_behind_the_failed_ones() {
    let (session, store) = session();
    session.open_note("n");
    store.set_fail_writes(true);
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    store.set_fail_writes(false);

    assert!(session.undo("n"));
    assert!(live_ids(&session, "n").is_empty());
    assert!(store.stroke_ids("n").is_empty());
    assert!(session.unsaved_changes());

    assert!(session.flush_pending());
    assert!(store.stroke_ids("n").is_empty());
    assert!(live_ids(&session, "n").is_empty());
    assert!(!session.unsaved_changes());
}

#[test]
fn reload_after_invalidate_keeps_unflushed_strokes() {
    let (session, store) = session();
    session.open_note("n");
    store.set_fail_writes(true);
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));

    session.invalidate("n");
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string()]);
    assert!(store.stroke_ids("n").is_empty());
}

#[test]
fn oversized_stroke_stays_visible_to_reads_render_and_erase() {
    let store = Arc::new(MemoryNoteStore::new());
    let settings = InkSettings {
        memory_threshold_bytes: 1000,
        ..InkSettings::default()
    };
    let session = session_with_settings(Arc::clone(&store), 1000.0, settings);
    session.open_note("n");
    session.commit_stroke(stroke("small", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    // 64 + 6 * 32 = 256 bytes, over the 200 byte admission cap.
    let big: Vec<(f32, f32)> = (0..6).map(|i| (100.0 + i as f32 * 10.0, 100.0)).collect();
    session.commit_stroke(stroke("big", "n", &big));

    assert_eq!(live_ids(&session, "n"), vec!["small".to_string(), "big".to_string()]);
    let mut surface = RecordingSurface::new(800.0, 1000.0);
    assert!(session.render("n", &mut surface, None));
    assert_eq!(surface.polyline_count(), 2);

    assert!(session.erase("n", &[(120.0, 95.0), (130.0, 105.0)]).is_committed());
    assert_eq!(live_ids(&session, "n"), vec!["small".to_string()]);
}

#[test]
fn commit_emits_dirty_redraw_then_history() {
    let (session, _) = session();
    session.open_note("n");
    let rx = session.subscribe();
    let a = stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]);
    let bounds = a.bounds;
    session.commit_stroke(a);

    let signals = drain(&rx);
    assert_eq!(signals[0], InkSignal::ForceRedraw(Some(bounds)));
    assert!(matches!(&signals[1], InkSignal::HistoryChanged { note_id, state } if note_id == "n" && state.can_undo));
}

#[test]
fn undo_emits_full_redraw_after_undo_signal() {
    let (session, _) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    let rx = session.subscribe();
    session.undo("n");

    let signals = drain(&rx);
    assert_eq!(signals[0], InkSignal::UndoRedoPerformed);
    assert_eq!(signals[1], InkSignal::ForceRedraw(None));
}

#[test]
fn history_survives_reopening_the_store() {
    let store = Arc::new(MemoryNoteStore::new());
    {
        let session = session_with(Arc::clone(&store), 1000.0);
        session.open_note("n");
        session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));
        session.commit_stroke(stroke("b", "n", &[(30.0, 30.0), (40.0, 40.0)]));
    }
    let session = session_with(Arc::clone(&store), 1000.0);
    session.open_note("n");
    assert!(session.can_undo("n"));
    assert!(!session.can_redo("n"));

    assert!(session.undo("n"));
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string()]);
    let outcome = session.commit_stroke(stroke("c", "n", &[(50.0, 50.0), (60.0, 60.0)]));
    assert!(matches!(outcome, CommitOutcome::Committed { sequence: 3, .. }));
}

#[test]
fn history_is_bounded_by_the_retention_limit() {
    let (session, store) = session();
    session.open_note("n");
    for i in 0..35 {
        let y = 10.0 + i as f32 * 5.0;
        session.commit_stroke(stroke(&format!("s{i}"), "n", &[(10.0, y), (20.0, y + 2.0)]));
    }
    let sequences: Vec<u64> = session.history_actions("n").iter().map(|a| a.sequence).collect();
    assert_eq!(sequences.len(), 30);
    assert_eq!(sequences[0], 6);
    assert_eq!(store.actions_for_note("n").unwrap().len(), 30);
}

#[test]
fn clear_history_disables_undo() {
    let (session, store) = session();
    session.open_note("n");
    session.commit_stroke(stroke("a", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    session.clear_history("n");
    assert!(!session.can_undo("n"));
    assert!(store.actions_for_note("n").unwrap().is_empty());
    assert_eq!(live_ids(&session, "n"), vec!["a".to_string()]);
}

#[test]
fn render_culls_strokes_outside_the_view() {
    let (session, _) = session();
    session.open_note("n");
    session.commit_stroke(stroke("visible", "n", &[(10.0, 10.0), (20.0, 20.0)]));
    session.commit_stroke(stroke("hidden", "n", &[(10.0, 5000.0), (20.0, 5010.0)]));

    let mut surface = RecordingSurface::new(800.0, 1000.0);
    assert!(session.render("n", &mut surface, None));
    assert_eq!(surface.polyline_count(), 1);
}

#[test]
fn strokes_load_from_store_on_first_access() {
    let store = Arc::new(MemoryNoteStore::new());
    store
        .insert_strokes("n", &[stroke("seeded", "n", &[(1.0, 1.0), (2.0, 2.0)])])
        .unwrap();
    let session = session_with(Arc::clone(&store), 1000.0);
    assert!(!session.is_cached("n"));
    assert_eq!(live_ids(&session, "n"), vec!["seeded".to_string()]);
    assert!(session.is_cached("n"));

    session.invalidate("n");
    assert!(!session.is_cached("n"));
    let stats = session.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 0);
}
