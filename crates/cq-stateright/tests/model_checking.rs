//! Exhaustive model checks of both pop disciplines.
//!
//! Run in release mode; the multi-consumer configurations explore tens of
//! thousands of states.

use cq_stateright::{check_model, Discipline, ModelBug, QueueModel, ScriptOp};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn model_multi_consumer_two_by_two() {
    init_tracing();
    let model = QueueModel::producers_consumers(Discipline::MultiConsumer, 2, 1, 2, 1);
    let report = check_model(model);
    assert!(report.passed, "{}", report.format());
    assert!(report.state_count > 100);
}

#[test]
fn model_single_consumer_two_producers() {
    init_tracing();
    let model = QueueModel::producers_consumers(Discipline::SingleConsumer, 2, 2, 1, 3);
    let report = check_model(model);
    assert!(report.passed, "{}", report.format());
}

#[test]
fn model_single_consumer_sees_own_push() {
    init_tracing();
    let model = QueueModel::new(
        Discipline::SingleConsumer,
        vec![
            vec![ScriptOp::Push(1)],
            vec![ScriptOp::Push(2)],
            vec![ScriptOp::Push(100), ScriptOp::Pop],
        ],
    );
    let report = check_model(model);
    assert!(report.passed, "{}", report.format());
}

#[test]
fn model_multi_consumer_push_then_pop_threads() {
    init_tracing();
    let model = QueueModel::new(
        Discipline::MultiConsumer,
        vec![
            vec![ScriptOp::Push(1), ScriptOp::Pop],
            vec![ScriptOp::Push(2), ScriptOp::Pop],
            vec![ScriptOp::Pop],
        ],
    );
    let report = check_model(model);
    assert!(report.passed, "{}", report.format());
}

#[test]
fn model_finds_unconditional_head_store() {
    init_tracing();
    let model = QueueModel::producers_consumers(Discipline::MultiConsumer, 1, 1, 2, 1)
        .with_bug(ModelBug::UnconditionalHeadStore);
    let report = check_model(model);
    assert!(!report.passed);

    let ce = report
        .violated("no duplicate pops")
        .expect("duplicate pop should be found");
    assert!(ce.interleaving.iter().filter(|a| a.action.contains("take")).count() >= 2);
    assert!(report.violated("linearizable").is_some());
}
