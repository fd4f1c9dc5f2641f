//! Polling waiter
//!
//! A waiter repeatedly fetches some state and checks it against an ordered
//! list of acceptors. The first matching acceptor decides the outcome; when
//! none match, the waiter sleeps and tries again until it runs out of
//! attempts.

use std::future::Future;
use std::time::Duration;

use aws_model::models::ecs::DescribeServicesResponse;
use tracing::{debug, info};

use crate::errors::HotswapError;

/// Waiter options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Delay between two polls
    pub delay: Duration,

    /// Polls before giving up, including the first one
    pub max_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

/// What a matching acceptor does to the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    Success,
    Failure,
}

/// A predicate over the polled state
pub struct Acceptor<T> {
    pub state: AcceptorState,
    pub name: &'static str,
    pub matcher: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> Acceptor<T> {
    pub fn new<M>(state: AcceptorState, name: &'static str, matcher: M) -> Self
    where
        M: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            state,
            name,
            matcher: Box::new(matcher),
        }
    }
}

/// Poll `fetch` until an acceptor matches
///
/// The first poll happens immediately and always happens, even with
/// `max_attempts` set to zero. Errors from `fetch` end the wait.
pub async fn wait_until<T, Fetch, FetchFut, S, SleepFut>(
    waiter: &str,
    options: &Options,
    acceptors: &[Acceptor<T>],
    mut fetch: Fetch,
    sleep_fn: S,
) -> Result<T, HotswapError>
where
    Fetch: FnMut() -> FetchFut,
    FetchFut: Future<Output = Result<T, HotswapError>>,
    S: Fn(Duration) -> SleepFut,
    SleepFut: Future<Output = ()>,
{
    let max_attempts = options.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let state = fetch().await?;

        if let Some(acceptor) = acceptors.iter().find(|a| (a.matcher)(&state)) {
            return match acceptor.state {
                AcceptorState::Success => {
                    info!("Waiter {} succeeded after {} attempt(s)", waiter, attempt);
                    Ok(state)
                }
                AcceptorState::Failure => Err(HotswapError::WaiterFailed {
                    waiter: waiter.to_string(),
                    reason: acceptor.name.to_string(),
                }),
            };
        }

        debug!(
            "Waiter {} attempt {}/{} not settled yet",
            waiter, attempt, max_attempts
        );
        if attempt < max_attempts {
            sleep_fn(options.delay).await;
        }
    }

    Err(HotswapError::WaiterTimeout {
        waiter: waiter.to_string(),
        attempts: max_attempts,
    })
}

/// Acceptors deciding when ECS service deployments have settled
pub fn deployment_to_finish_acceptors() -> Vec<Acceptor<DescribeServicesResponse>> {
    vec![
        Acceptor::new(AcceptorState::Failure, "service is MISSING", |r: &DescribeServicesResponse| {
            r.failures.iter().any(|f| f.reason.as_deref() == Some("MISSING"))
        }),
        Acceptor::new(AcceptorState::Failure, "service is DRAINING", |r: &DescribeServicesResponse| {
            r.services.iter().any(|s| s.status.as_deref() == Some("DRAINING"))
        }),
        Acceptor::new(AcceptorState::Failure, "service is INACTIVE", |r: &DescribeServicesResponse| {
            r.services.iter().any(|s| s.status.as_deref() == Some("INACTIVE"))
        }),
        Acceptor::new(
            AcceptorState::Success,
            "primary deployments are running",
            |r: &DescribeServicesResponse| {
                r.services
                    .iter()
                    .flat_map(|s| s.deployments.iter())
                    .filter(|d| d.status.as_deref() == Some("PRIMARY"))
                    .all(|d| d.running_count >= d.desired_count)
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use aws_model::models::ecs::{Deployment, Failure, Service};

    fn options(max_attempts: u32) -> Options {
        Options {
            delay: Duration::from_secs(10),
            max_attempts,
        }
    }

    fn service(status: &str, deployments: Vec<Deployment>) -> Service {
        Service {
            service_arn: Some("arn:aws:ecs:us-east-1:123:service/cluster/svc".to_string()),
            status: Some(status.to_string()),
            deployments,
            ..Default::default()
        }
    }

    fn deployment(status: &str, desired: i64, running: i64) -> Deployment {
        Deployment {
            status: Some(status.to_string()),
            desired_count: desired,
            running_count: running,
            ..Default::default()
        }
    }

    fn response(services: Vec<Service>) -> DescribeServicesResponse {
        DescribeServicesResponse {
            services,
            failures: vec![],
        }
    }

    #[tokio::test]
    async fn test_succeeds_when_primary_deployment_is_running() {
        let polls = vec![
            response(vec![service("ACTIVE", vec![deployment("PRIMARY", 2, 0), deployment("ACTIVE", 2, 2)])]),
            response(vec![service("ACTIVE", vec![deployment("PRIMARY", 2, 1)])]),
            response(vec![service("ACTIVE", vec![deployment("PRIMARY", 2, 2)])]),
        ];
        let calls = AtomicU32::new(0);
        let sleeps = Mutex::new(Vec::new());

        let result = wait_until(
            "DeploymentToFinish",
            &options(60),
            &deployment_to_finish_acceptors(),
            || {
                let i = calls.fetch_add(1, Ordering::SeqCst) as usize;
                let poll = polls[i].clone();
                async move { Ok(poll) }
            },
            |d| {
                sleeps.lock().unwrap().push(d);
                async {}
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*sleeps.lock().unwrap(), vec![Duration::from_secs(10); 2]);
    }

    #[tokio::test]
    async fn test_missing_service_fails() {
        let poll = DescribeServicesResponse {
            services: vec![],
            failures: vec![Failure {
                arn: Some("arn".to_string()),
                reason: Some("MISSING".to_string()),
                detail: None,
            }],
        };

        let result = wait_until(
            "DeploymentToFinish",
            &options(60),
            &deployment_to_finish_acceptors(),
            || {
                let poll = poll.clone();
                async move { Ok(poll) }
            },
            |_| async {},
        )
        .await;

        assert!(matches!(result, Err(HotswapError::WaiterFailed { .. })));
    }

    #[tokio::test]
    async fn test_failure_acceptors_win_over_success() {
        // no PRIMARY deployment pending, but the service is draining
        let poll = response(vec![service("DRAINING", vec![])]);

        let result = wait_until(
            "DeploymentToFinish",
            &options(60),
            &deployment_to_finish_acceptors(),
            || {
                let poll = poll.clone();
                async move { Ok(poll) }
            },
            |_| async {},
        )
        .await;

        match result {
            Err(HotswapError::WaiterFailed { reason, .. }) => assert_eq!(reason, "service is DRAINING"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_inactive_service_fails() {
        let poll = response(vec![service("INACTIVE", vec![deployment("PRIMARY", 1, 1)])]);

        let result = wait_until(
            "DeploymentToFinish",
            &options(3),
            &deployment_to_finish_acceptors(),
            || {
                let poll = poll.clone();
                async move { Ok(poll) }
            },
            |_| async {},
        )
        .await;

        assert!(matches!(result, Err(HotswapError::WaiterFailed { .. })));
    }

    #[tokio::test]
    async fn test_times_out_after_max_attempts() {
        let poll = response(vec![service("ACTIVE", vec![deployment("PRIMARY", 3, 1)])]);
        let calls = Arc::new(AtomicU32::new(0));
        let sleeps = AtomicU32::new(0);

        let result = wait_until(
            "DeploymentToFinish",
            &options(4),
            &deployment_to_finish_acceptors(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                let poll = poll.clone();
                async move { Ok(poll) }
            },
            |_| {
                sleeps.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(HotswapError::WaiterTimeout { attempts: 4, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(sleeps.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_polls_once() {
        let poll = response(vec![service("ACTIVE", vec![deployment("PRIMARY", 1, 1)])]);
        let calls = AtomicU32::new(0);

        let result = wait_until(
            "DeploymentToFinish",
            &options(0),
            &deployment_to_finish_acceptors(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                let poll = poll.clone();
                async move { Ok(poll) }
            },
            |_| async {},
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_ends_wait() {
        let result: Result<DescribeServicesResponse, _> = wait_until(
            "DeploymentToFinish",
            &options(5),
            &deployment_to_finish_acceptors(),
            || async { Err(HotswapError::Internal("boom".to_string())) },
            |_| async {},
        )
        .await;

        assert!(matches!(result, Err(HotswapError::Internal(_))));
    }

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.delay, Duration::from_secs(10));
        assert_eq!(opts.max_attempts, 60);
    }
}
