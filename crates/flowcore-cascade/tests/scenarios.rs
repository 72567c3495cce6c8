use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowcore_cascade::{
    CascadeConfig, CascadeError, CascadeExecutor, RetryPolicy, Tier, TierOutcome,
};

#[derive(Debug)]
struct Ticket {
    text: String,
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries)
        .with_backoff(Duration::from_millis(100), Duration::from_secs(1))
        .with_jitter(0.0)
}

#[tokio::test(start_paused = true)]
async fn generative_recovers_after_one_timeout() {
    let code_calls = counter();
    let generative_calls = counter();
    let human_calls = counter();

    let code = {
        let calls = code_calls.clone();
        Tier::new("code", move |ticket: Arc<Ticket>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(anyhow::anyhow!("no rule matches '{}'", ticket.text))
            }
        })
        .with_retry(RetryPolicy::none())
    };

    let generative = {
        let calls = generative_calls.clone();
        Tier::new("generative", move |_: Arc<Ticket>| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, anyhow::Error>("drafted reply".to_string())
            }
        })
        .with_timeout(Duration::from_secs(2))
        .with_retry(quick_retry(1))
    };

    let human = {
        let calls = human_calls.clone();
        Tier::new("human", move |_: Arc<Ticket>| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>("escalated".to_string())
            }
        })
    };

    let executor = CascadeExecutor::new(vec![code, generative, human])
        .with_config(CascadeConfig::default().with_total_timeout(Duration::from_secs(10)));

    let result = executor
        .execute(Ticket {
            text: "refund please".into(),
        })
        .await
        .unwrap();

    assert_eq!(result.tier, "generative");
    assert_eq!(result.output, "drafted reply");

    let code_attempts = result.metrics.attempts_for("code");
    assert_eq!(code_attempts.len(), 1);
    assert!(matches!(code_attempts[0].outcome, TierOutcome::Failed { .. }));

    let generative_attempts = result.metrics.attempts_for("generative");
    assert_eq!(generative_attempts.len(), 2);
    assert!(matches!(generative_attempts[0].outcome, TierOutcome::TimedOut { .. }));
    assert_eq!(generative_attempts[1].outcome, TierOutcome::Succeeded);
    assert_eq!(generative_attempts[1].attempt, 2);

    assert_eq!(human_calls.load(Ordering::SeqCst), 0);
    assert!(result.metrics.attempts_for("human").is_empty());
    assert_eq!(result.metrics.tiers_invoked(), vec!["code", "generative"]);
    assert!(result.metrics.total_duration < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn every_tier_failing_reports_each_in_order() {
    let names = ["code", "generative", "agentic", "human"];
    let tiers: Vec<Tier<Ticket, String>> = names
        .iter()
        .map(|name| {
            let label = name.to_string();
            Tier::new(name, move |_: Arc<Ticket>| {
                let label = label.clone();
                async move { Err::<String, _>(anyhow::anyhow!("{label} could not help")) }
            })
            .with_retry(quick_retry(1))
        })
        .collect();

    let err = CascadeExecutor::new(tiers)
        .execute(Ticket {
            text: "???".into(),
        })
        .await
        .unwrap_err();

    let CascadeError::AllTiersFailed { reasons, metrics } = &err else {
        panic!("expected AllTiersFailed, got {err}");
    };
    let tiers: Vec<&str> = reasons.iter().map(|r| r.tier.as_str()).collect();
    assert_eq!(tiers, names);
    for reason in reasons {
        assert_eq!(reason.attempts, 2);
        assert!(reason.reason.ends_with("could not help"));
    }
    assert_eq!(metrics.attempts.len(), 8);
    assert!(err.to_string().starts_with("all 4 tiers failed"));
}

#[tokio::test(start_paused = true)]
async fn total_budget_stops_the_cascade() {
    let slow = |name: &str| {
        Tier::new(name, |_: Arc<Ticket>| async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok::<_, anyhow::Error>("too late".to_string())
        })
        .with_timeout(Duration::from_secs(60))
    };

    let executor = CascadeExecutor::new(vec![slow("agentic"), slow("human")])
        .with_config(CascadeConfig::default().with_total_timeout(Duration::from_secs(10)));
    let err = executor
        .execute(Ticket {
            text: "long job".into(),
        })
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let metrics = err.metrics();
    assert_eq!(metrics.attempts.len(), 1);
    assert_eq!(metrics.attempts[0].tier, "agentic");
    assert!(metrics.attempts_for("human").is_empty());
    match err {
        CascadeError::CascadeTimeout { timeout, tier, .. } => {
            assert_eq!(timeout, Duration::from_secs(10));
            assert_eq!(tier.as_deref(), Some("agentic"));
        }
        other => panic!("unexpected: {other}"),
    }
}
