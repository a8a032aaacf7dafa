use std::collections::BTreeSet;

use machina_core::{async_trait, Context, Kernel, KernelError, MachineId, Policy, Step};
use machina_testing::{Action, Harness, Record, Script, Target, Then};

#[tokio::test]
async fn lone_root_reaches_quiescence() {
    let outcome = Harness::new()
        .script("root", Script::new(vec![Action::note("up"), Action::Halt]))
        .run("root")
        .await
        .unwrap();

    assert_eq!(outcome.report.launched, 1);
    assert_eq!(outcome.report.halted, vec![MachineId(1)]);
    assert_eq!(outcome.notes(MachineId(1)), vec!["up"]);
}

#[tokio::test]
async fn unknown_root_policy_is_rejected() {
    let err = Kernel::builder().build().run("nobody").await.unwrap_err();
    assert!(matches!(err, KernelError::UnknownPolicy(name) if name == "nobody"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_spawns_get_distinct_sequential_ids() {
    let outcome = Harness::new()
        .script(
            "root",
            Script::new(vec![
                Action::spawn("forker"),
                Action::spawn("forker"),
                Action::spawn("forker"),
                Action::Halt,
            ]),
        )
        .script(
            "forker",
            Script::new(vec![
                Action::spawn("leaf"),
                Action::spawn("leaf"),
                Action::spawn("leaf"),
            ]),
        )
        .script("leaf", Script::new(vec![]))
        .run("root")
        .await
        .unwrap();

    let spawned = outcome.spawned();
    let distinct: BTreeSet<_> = spawned.iter().copied().collect();
    assert_eq!(spawned.len(), 12);
    assert_eq!(distinct, (2..=13).map(MachineId).collect());

    assert_eq!(outcome.report.launched, 13);
    let halted: BTreeSet<_> = outcome.report.halted.iter().copied().collect();
    assert_eq!(halted, (1..=13).map(MachineId).collect());
    assert_eq!(outcome.report.halted[0], MachineId(1));
}

#[tokio::test]
async fn halting_the_root_cascades_down_the_tree() {
    let outcome = Harness::new()
        .script(
            "root",
            Script::new(vec![
                Action::spawn("child"),
                Action::on(Target::Spawned(0), "ready", Then::Halt),
            ]),
        )
        .script(
            "child",
            Script::new(vec![
                Action::spawn("grandchild"),
                Action::emit(Target::Parent, "ready"),
            ]),
        )
        .script("grandchild", Script::new(vec![]))
        .run("root")
        .await
        .unwrap();

    assert_eq!(
        outcome.report.halted,
        vec![MachineId(1), MachineId(2), MachineId(3)]
    );
    // halt announcements are routed like any other broadcast
    assert_eq!(outcome.report.routed["halt"], 2);

    let grandchild_start = outcome.of(MachineId(3)).next().unwrap();
    assert_eq!(
        grandchild_start,
        &Record::Started {
            context: MachineId(2)
        }
    );
}

#[tokio::test]
async fn acknowledgement_follows_the_acked_event() {
    let outcome = Harness::new()
        .script(
            "root",
            Script::new(vec![
                Action::spawn("echo"),
                Action::emit_with_ack(Target::Spawned(0), "ping"),
                Action::on(Target::Spawned(0), "pingack", Then::Run(0)),
            ])
            .with_block(vec![Action::note("acked"), Action::Halt]),
        )
        .script(
            "echo",
            Script::new(vec![Action::on(Target::Parent, "ping", Then::Run(0))])
                .with_block(vec![Action::note("pinged")]),
        )
        .run("root")
        .await
        .unwrap();

    assert_eq!(outcome.notes(MachineId(1)), vec!["acked"]);
    assert_eq!(outcome.notes(MachineId(2)), vec!["pinged"]);
    assert_eq!(outcome.report.routed["pingack"], 1);

    let acked = outcome
        .of(MachineId(1))
        .find_map(|record| match record {
            Record::Entered { event, .. } => event.clone(),
            _ => None,
        })
        .unwrap();
    assert_eq!(acked.source, MachineId(2));
    assert_eq!(acked.destination, MachineId(1));
    assert!(!acked.ack_requested);
}

#[tokio::test]
async fn halt_announcement_reaches_listeners() {
    let outcome = Harness::new()
        .script(
            "root",
            Script::new(vec![
                Action::spawn("worker"),
                Action::spawn("watcher"),
                Action::on(Target::Spawned(1), "ready", Then::Run(0)),
            ])
            .with_block(vec![
                Action::emit(Target::Spawned(0), "go"),
                Action::on(Target::Spawned(1), "halt", Then::Halt),
            ]),
        )
        .script(
            "worker",
            Script::new(vec![Action::on(Target::Parent, "go", Then::Halt)]),
        )
        .script(
            "watcher",
            Script::new(vec![
                Action::on(Target::Machine(MachineId(2)), "halt", Then::Run(0)),
                Action::emit(Target::Parent, "ready"),
            ])
            .with_block(vec![Action::note("worker gone"), Action::Halt]),
        )
        .run("root")
        .await
        .unwrap();

    assert_eq!(outcome.notes(MachineId(3)), vec!["worker gone"]);
    assert_eq!(
        outcome.report.halted,
        vec![MachineId(2), MachineId(3), MachineId(1)]
    );
}

#[tokio::test]
async fn unmatched_events_are_dropped_by_the_receiver() {
    let outcome = Harness::new()
        .script(
            "root",
            Script::new(vec![
                Action::spawn("child"),
                Action::emit(Target::Spawned(0), "noise"),
                Action::emit(Target::Spawned(0), "ping"),
                Action::on(Target::Spawned(0), "pong", Then::Halt),
            ]),
        )
        .script(
            "child",
            Script::new(vec![Action::on(Target::Parent, "ping", Then::Run(0))])
                .with_block(vec![
                    Action::note("pinged"),
                    Action::emit(Target::Parent, "pong"),
                ]),
        )
        .run("root")
        .await
        .unwrap();

    // routed and handed over like any other event, then ignored
    assert_eq!(outcome.report.routed["noise"], 1);
    assert_eq!(outcome.report.unicasts, 3);
    assert_eq!(outcome.notes(MachineId(2)), vec!["pinged"]);

    let entered = outcome
        .of(MachineId(2))
        .filter(|record| matches!(record, Record::Entered { .. }))
        .count();
    assert_eq!(entered, 1);
}

#[tokio::test]
async fn failing_policy_still_halts_and_is_reported() {
    let err = Harness::new()
        .script("root", Script::new(vec![Action::spawn("ghost")]))
        .run("root")
        .await
        .unwrap_err();

    let kernel_err = err.downcast_ref::<KernelError>().unwrap();
    assert!(matches!(
        kernel_err,
        KernelError::Policy { machine, .. } if *machine == MachineId(1)
    ));
    assert!(err.to_string().contains("ghost"));
}

// ============================================================================
// A hand-written policy next to scripted ones
// ============================================================================

const LISTENERS: usize = 3;

#[derive(Debug, Clone)]
enum Gathering {
    Tock,
}

#[derive(Default)]
struct Gather {
    tocks: usize,
}

#[async_trait]
impl Policy for Gather {
    type State = Gathering;

    async fn setup(&mut self, cx: &mut Context<Gathering>) -> anyhow::Result<Step<Gathering>> {
        for _ in 0..LISTENERS {
            cx.spawn("listener").await?;
        }
        cx.react_any("tock", Step::Enter(Gathering::Tock));
        cx.broadcast("tick").await?;
        Ok(Step::Listen)
    }

    async fn on_state(
        &mut self,
        state: Gathering,
        _: &mut Context<Gathering>,
    ) -> anyhow::Result<Step<Gathering>> {
        match state {
            Gathering::Tock => {
                self.tocks += 1;
                if self.tocks == LISTENERS {
                    Ok(Step::Halt)
                } else {
                    Ok(Step::Listen)
                }
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_is_delivered_to_every_live_machine_once() {
    let outcome = Harness::new()
        .policy("gather", Gather::default)
        .script(
            "listener",
            Script::new(vec![Action::on(Target::Everyone, "tick", Then::Run(0))])
                .with_block(vec![
                    Action::note("tick"),
                    Action::emit(Target::Parent, "tock"),
                ]),
        )
        .run("gather")
        .await
        .unwrap();

    for id in 2..=4 {
        assert_eq!(outcome.notes(MachineId(id)), vec!["tick"]);
    }
    assert_eq!(outcome.report.routed["tick"], 1);
    assert_eq!(outcome.report.routed["tock"], 3);
    // the broadcaster gets its own copy too
    assert!(outcome.report.deliveries >= 4 + 3);
    assert_eq!(outcome.report.halted[0], MachineId(1));
}
