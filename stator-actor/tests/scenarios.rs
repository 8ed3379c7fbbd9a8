//! End-to-end interpreter scenarios.
//!
//! Timing-sensitive tests run under a paused tokio clock, so delays advance
//! deterministically.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stator_actor::{
    from_callback, from_promise, spawn_actor, ActorOptions, ActorStatus, IdProvider,
    Implementations, Machine,
};

async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test]
async fn test_toggle() {
    let machine = Machine::build(&json!({
        "id": "toggle",
        "initial": "inactive",
        "states": {
            "inactive": {"on": {"TOGGLE": "active"}},
            "active": {"on": {"TOGGLE": "inactive"}}
        }
    }))
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    let mut values = Vec::new();
    for _ in 0..3 {
        actor.send("TOGGLE").unwrap();
        values.push(serde_json::to_value(&actor.get_snapshot().value).unwrap());
    }
    assert_eq!(values, vec![json!("active"), json!("inactive"), json!("active")]);
}

#[tokio::test]
async fn test_guarded_counter() {
    let machine = Machine::build_with(
        &json!({
            "id": "counter",
            "context": {"count": 0},
            "initial": "counting",
            "states": {
                "counting": {
                    "on": {"INC": {"guard": "ctx.count < 3", "actions": "increment"}}
                }
            }
        }),
        Implementations::new().action("increment", |args| {
            let count = args.context()["count"].as_i64().unwrap_or(0);
            args.context_mut()["count"] = json!(count + 1);
            Ok(())
        }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    let mut counts = Vec::new();
    for _ in 0..4 {
        actor.send("INC").unwrap();
        counts.push(actor.get_snapshot().context["count"].as_i64().unwrap());
    }
    assert_eq!(counts, vec![1, 2, 3, 3]);
}

#[tokio::test]
async fn test_shallow_history() {
    let machine = Machine::build(&json!({
        "id": "hist",
        "initial": "parent",
        "states": {
            "parent": {
                "initial": "a",
                "on": {"EXIT": "outside"},
                "states": {
                    "a": {"on": {"NEXT": "b"}},
                    "b": {"on": {"NEXT": "c"}},
                    "c": {},
                    "hist": {"type": "history", "history": "shallow"}
                }
            },
            "outside": {"on": {"RETURN": "parent.hist"}}
        }
    }))
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    actor.send("NEXT").unwrap(); // parent.b
    actor.send("EXIT").unwrap();
    assert!(actor.get_snapshot().matches("outside"));
    actor.send("RETURN").unwrap();
    assert_eq!(
        serde_json::to_value(&actor.get_snapshot().value).unwrap(),
        json!({"parent": "b"})
    );

    actor.send("NEXT").unwrap(); // parent.c
    actor.send("EXIT").unwrap();
    actor.send("RETURN").unwrap();
    assert_eq!(
        serde_json::to_value(&actor.get_snapshot().value).unwrap(),
        json!({"parent": "c"})
    );
}

#[tokio::test]
async fn test_deep_history_under_parallel() {
    let machine = Machine::build(&json!({
        "id": "deep",
        "initial": "active",
        "states": {
            "active": {
                "type": "parallel",
                "on": {"STOP": "stopped"},
                "states": {
                    "region1": {
                        "initial": "off",
                        "states": {
                            "off": {"on": {"TOGGLE": "on"}},
                            "on": {},
                            "hist": {"type": "history", "history": "deep"}
                        }
                    },
                    "region2": {
                        "initial": "static",
                        "states": {"static": {}}
                    }
                }
            },
            "stopped": {"on": {"RESUME": "active.region1.hist"}}
        }
    }))
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    actor.send("TOGGLE").unwrap(); // region1 -> on
    actor.send("STOP").unwrap();
    assert!(actor.get_snapshot().matches("stopped"));

    // History addresses only region1; region2 resets to its initial.
    actor.send("RESUME").unwrap();
    let snapshot = actor.get_snapshot();
    assert!(snapshot.matches("active.region1.on"));
    assert!(snapshot.matches("active.region2.static"));
}

#[tokio::test(start_paused = true)]
async fn test_zombie_prevention() {
    let done_effect = Arc::new(AtomicUsize::new(0));
    let effect_count = Arc::clone(&done_effect);

    let machine = Machine::build_with(
        &json!({
            "id": "zombie",
            "initial": "fetching",
            "states": {
                "fetching": {
                    "on": {"CANCEL": "cancelled"},
                    "invoke": {
                        "id": "slowFetch",
                        "src": "slowFetch",
                        "onDone": {"target": "success", "actions": "recordDone"}
                    }
                },
                "success": {},
                "cancelled": {}
            }
        }),
        Implementations::new()
            .logic(
                "slowFetch",
                from_promise(|_input| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(json!("payload"))
                }),
            )
            .action("recordDone", move |_| {
                effect_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();
    assert!(actor.get_snapshot().matches("fetching"));

    wait(30).await;
    actor.send("CANCEL").unwrap();
    assert!(actor.get_snapshot().matches("cancelled"));

    wait(170).await;
    assert!(actor.get_snapshot().matches("cancelled"));
    assert_eq!(done_effect.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delayed_transition_cancelled_by_reentry() {
    let machine = Machine::build(&json!({
        "id": "delayed",
        "initial": "timing",
        "states": {
            "timing": {
                "after": {"200": "done"},
                "on": {"RESET": "timing"}
            },
            "done": {}
        }
    }))
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    let done_entries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&done_entries);
    actor.subscribe(move |snapshot| {
        if snapshot.matches("done") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    actor.start().unwrap();

    wait(80).await;
    actor.send("RESET").unwrap(); // countdown restarts from zero

    wait(50).await;
    assert!(actor.get_snapshot().matches("timing"));

    wait(200).await;
    assert!(actor.get_snapshot().matches("done"));
    assert_eq!(done_entries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_parallel_preemption_by_lca() {
    let counts = Arc::new(Mutex::new(vec![0usize; 3]));
    let mark = |counts: &Arc<Mutex<Vec<usize>>>, index: usize| {
        let counts = Arc::clone(counts);
        move |_: &mut stator_actor::ActionArgs<'_>| {
            counts.lock()[index] += 1;
            Ok(())
        }
    };

    let machine = Machine::build_with(
        &json!({
            "id": "preempt",
            "initial": "p",
            "states": {
                "p": {"type": "parallel", "states": {
                    "r1": {"initial": "idle", "states": {
                        "idle": {"on": {"TRIGGER": {"target": "done", "actions": "mark1"}}},
                        "done": {}
                    }},
                    "r2": {"initial": "idle", "states": {
                        "idle": {"on": {"TRIGGER": {"target": "done", "actions": "mark2"}}},
                        "done": {}
                    }},
                    "r3": {"initial": "idle", "states": {
                        "idle": {"on": {"TRIGGER": {"target": "done", "actions": "mark3"}}},
                        "done": {}
                    }}
                }}
            }
        }),
        Implementations::new()
            .action("mark1", mark(&counts, 0))
            .action("mark2", mark(&counts, 1))
            .action("mark3", mark(&counts, 2)),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();
    actor.send("TRIGGER").unwrap();

    let snapshot = actor.get_snapshot();
    assert!(snapshot.matches("p.r1.done"));
    assert!(snapshot.matches("p.r2.done"));
    assert!(snapshot.matches("p.r3.done"));
    assert_eq!(counts.lock().clone(), vec![1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_delay_fires_after_entry_completes() {
    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = Arc::clone(&order);

    let machine = Machine::build_with(
        &json!({
            "id": "zero",
            "initial": "staging",
            "states": {
                "staging": {"entry": "noteEntry", "after": {"0": "live"}},
                "live": {"entry": "noteLive"}
            }
        }),
        Implementations::new()
            .action("noteEntry", {
                let log = Arc::clone(&order);
                move |_| {
                    log.lock().push("enter:staging".to_string());
                    Ok(())
                }
            })
            .action("noteLive", move |_| {
                log.lock().push("enter:live".to_string());
                Ok(())
            }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    // The zero delay is delivered in a later macro-step, never inside the
    // scheduling one.
    assert!(actor.get_snapshot().matches("staging"));

    wait(1).await;
    assert!(actor.get_snapshot().matches("live"));
    assert_eq!(
        order.lock().clone(),
        vec!["enter:staging".to_string(), "enter:live".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_named_delay_resolved_at_scheduling() {
    let machine = Machine::build_with(
        &json!({
            "id": "named-delay",
            "context": {"timeout": 120},
            "initial": "timing",
            "states": {
                "timing": {"after": {"fromContext": "done"}},
                "done": {}
            }
        }),
        Implementations::new().delay_with("fromContext", |ctx, _event| {
            ctx["timeout"].as_u64().unwrap_or(0)
        }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    wait(100).await;
    assert!(actor.get_snapshot().matches("timing"));
    wait(30).await;
    assert!(actor.get_snapshot().matches("done"));
}

#[tokio::test(start_paused = true)]
async fn test_promise_invocation_done_and_error() {
    let machine = Machine::build_with(
        &json!({
            "id": "fetcher",
            "context": {"rows": null},
            "initial": "loading",
            "states": {
                "loading": {
                    "invoke": {
                        "id": "fetch",
                        "src": "fetch",
                        "input": {"user": 7},
                        "onDone": {"target": "ready", "actions": "keepOutput"},
                        "onError": "failed"
                    }
                },
                "ready": {},
                "failed": {}
            }
        }),
        Implementations::new()
            .logic(
                "fetch",
                from_promise(|input| async move {
                    if input["user"] == json!(7) {
                        Ok(json!({"rows": 3}))
                    } else {
                        Err(json!("unknown user"))
                    }
                }),
            )
            .action("keepOutput", |args| {
                let rows = args.event().payload["rows"].clone();
                args.context_mut()["rows"] = rows;
                Ok(())
            }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();
    assert!(actor.get_snapshot().matches("loading"));

    wait(1).await;
    let snapshot = actor.get_snapshot();
    assert!(snapshot.matches("ready"));
    assert_eq!(snapshot.context["rows"], json!(3));
}

#[tokio::test(start_paused = true)]
async fn test_promise_rejection_routes_on_error() {
    let machine = Machine::build_with(
        &json!({
            "id": "failing",
            "initial": "loading",
            "states": {
                "loading": {
                    "invoke": {"id": "fetch", "src": "fetch",
                               "onDone": "ready", "onError": "failed"}
                },
                "ready": {},
                "failed": {}
            }
        }),
        Implementations::new().logic(
            "fetch",
            from_promise(|_input| async { Err(json!("boom")) }),
        ),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();
    wait(1).await;
    assert!(actor.get_snapshot().matches("failed"));
}

#[tokio::test(start_paused = true)]
async fn test_invocation_restarts_on_reentry() {
    let starts = Arc::new(AtomicUsize::new(0));
    let start_count = Arc::clone(&starts);

    let machine = Machine::build_with(
        &json!({
            "id": "restart",
            "initial": "watching",
            "states": {
                "watching": {
                    "on": {"RESET": "watching"},
                    "invoke": {"id": "watcher", "src": "watcher"}
                }
            }
        }),
        Implementations::new().logic(
            "watcher",
            from_callback(move |_args| {
                start_count.fetch_add(1, Ordering::SeqCst);
                None
            }),
        ),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    // External self-transition: the old invocation stops, a new one starts.
    actor.send("RESET").unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_callback_send_back_receive_and_cleanup() {
    let cleaned = Arc::new(AtomicUsize::new(0));
    let cleanup_count = Arc::clone(&cleaned);

    let machine = Machine::build_with(
        &json!({
            "id": "echoer",
            "context": {"echoes": 0},
            "initial": "open",
            "states": {
                "open": {
                    "invoke": {"id": "echo", "src": "echo"},
                    "on": {
                        "POKE": {"actions": "pokeChild"},
                        "ECHOED": {"actions": "countEcho"},
                        "CLOSE": "closed"
                    }
                },
                "closed": {}
            }
        }),
        Implementations::new()
            .logic(
                "echo",
                from_callback(move |args| {
                    let sender = args.clone();
                    args.receive(move |event| {
                        if event.event_type == "POKE" {
                            sender.send_back("ECHOED");
                        }
                    });
                    let cleanup_count = Arc::clone(&cleanup_count);
                    Some(Box::new(move || {
                        cleanup_count.fetch_add(1, Ordering::SeqCst);
                    }))
                }),
            )
            .action("pokeChild", |args| {
                args.send_to("echo", "POKE");
                Ok(())
            })
            .action("countEcho", |args| {
                let echoes = args.context()["echoes"].as_i64().unwrap_or(0);
                args.context_mut()["echoes"] = json!(echoes + 1);
                Ok(())
            }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    actor.send("POKE").unwrap();
    assert_eq!(actor.get_snapshot().context["echoes"], json!(1));

    actor.send("CLOSE").unwrap();
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);

    // The adapter is stopped; nothing can echo any more.
    actor.send("POKE").unwrap();
    assert_eq!(actor.get_snapshot().context["echoes"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_invoked_machine_talks_to_parent() {
    let child = Machine::build_with(
        &json!({
            "id": "worker",
            "initial": "working",
            "states": {
                "working": {
                    "entry": "announce",
                    "on": {"FINISH": {"actions": "reportDone"}}
                }
            }
        }),
        Implementations::new()
            .action("announce", |args| {
                args.send_parent("WORKER_READY");
                Ok(())
            })
            .action("reportDone", |args| {
                args.send_parent("WORKER_DONE");
                Ok(())
            }),
    )
    .unwrap();

    let machine = Machine::build_with(
        &json!({
            "id": "boss",
            "initial": "delegating",
            "states": {
                "delegating": {
                    "invoke": {"id": "worker", "src": "worker"},
                    "on": {
                        "WORKER_READY": {"actions": "tellWorker"},
                        "WORKER_DONE": "satisfied"
                    }
                },
                "satisfied": {}
            }
        }),
        Implementations::new()
            .logic("worker", child)
            .action("tellWorker", |args| {
                args.send_to("worker", "FINISH");
                Ok(())
            }),
    )
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();

    // ready -> tellWorker -> FINISH -> done, all through the two mailboxes.
    assert!(actor.get_snapshot().matches("satisfied"));
}

#[tokio::test(start_paused = true)]
async fn test_timers_cancelled_on_stop() {
    let machine = Machine::build(&json!({
        "id": "stopper",
        "initial": "timing",
        "states": {
            "timing": {"after": {"50": "done"}},
            "done": {}
        }
    }))
    .unwrap();

    let actor = spawn_actor(&machine, ActorOptions::default());
    actor.start().unwrap();
    actor.stop();

    wait(100).await;
    assert!(actor.get_snapshot().matches("timing"));
    assert_eq!(actor.status(), ActorStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_deterministic_replay() {
    fn fixed_ids() -> IdProvider {
        let counter = AtomicUsize::new(0);
        Arc::new(move || format!("id-{}", counter.fetch_add(1, Ordering::SeqCst)))
    }

    async fn run_once() -> Vec<Value> {
        let machine = Machine::build_with(
            &json!({
                "id": "replay",
                "context": {"count": 0},
                "initial": "a",
                "states": {
                    "a": {"on": {"GO": {"target": "b", "actions": "bump"}},
                          "after": {"40": "c"}},
                    "b": {"on": {"GO": "a"}},
                    "c": {}
                }
            }),
            Implementations::new().action("bump", |args| {
                let count = args.context()["count"].as_i64().unwrap_or(0);
                args.context_mut()["count"] = json!(count + 1);
                Ok(())
            }),
        )
        .unwrap();

        let actor = spawn_actor(
            &machine,
            ActorOptions {
                id_provider: Some(fixed_ids()),
                ..Default::default()
            },
        );
        let observed = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&observed);
        actor.subscribe(move |snapshot| {
            sink.lock().push(json!({
                "value": snapshot.value,
                "context": snapshot.context,
            }));
        });

        actor.start().unwrap();
        actor.send("GO").unwrap();
        actor.send("GO").unwrap();
        wait(60).await;

        let result = observed.lock().clone();
        result
    }

    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
