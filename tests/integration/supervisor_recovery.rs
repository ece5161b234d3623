use std::time::Duration;
use zygote::supervisor::{ProcessSpec, Supervisor, SupervisorSettings};

fn fast() -> SupervisorSettings {
    SupervisorSettings {
        poll_interval: Duration::from_millis(100),
        stop_timeout: Duration::from_secs(2),
    }
}

fn sleeper() -> ProcessSpec {
    ProcessSpec::new("sleep").arg("30")
}

/// Poll until `check` holds, for at most five seconds
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..50 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_killed_process_is_relaunched() {
    let supervisor = Supervisor::new(fast());
    supervisor.add_process("worker", sleeper(), false).await.unwrap();
    supervisor.start().await.unwrap();
    assert!(supervisor.is_alive("worker").await);

    let first_pid = supervisor.pid("worker").await.unwrap();
    // SAFETY: signalling a child we spawned
    let killed = unsafe { libc::kill(first_pid as libc::pid_t, libc::SIGKILL) };
    assert_eq!(killed, 0);

    let sup = &supervisor;
    let relaunched = eventually(|| async move {
        sup.restart_count("worker").await.unwrap_or(0) >= 1 && sup.is_alive("worker").await
    })
    .await;
    assert!(relaunched, "worker was not relaunched");
    assert_ne!(supervisor.pid("worker").await, Some(first_pid));

    supervisor.stop().await;
    assert!(!supervisor.is_alive("worker").await);
}

#[tokio::test]
async fn test_crash_recovered_within_two_ticks() {
    let settings = SupervisorSettings {
        poll_interval: Duration::from_millis(200),
        stop_timeout: Duration::from_secs(2),
    };
    let supervisor = Supervisor::new(settings);
    supervisor.add_process("worker", sleeper(), false).await.unwrap();
    supervisor.start().await.unwrap();
    let first_pid = supervisor.pid("worker").await.unwrap();

    // SAFETY: signalling a child we spawned
    assert_eq!(unsafe { libc::kill(first_pid as libc::pid_t, libc::SIGKILL) }, 0);
    tokio::time::sleep(settings.poll_interval * 2 + settings.poll_interval / 4).await;

    assert_eq!(supervisor.restart_count("worker").await, Some(1));
    assert!(supervisor.is_alive("worker").await);
    assert_ne!(supervisor.pid("worker").await, Some(first_pid));
    supervisor.stop().await;
}

#[tokio::test]
async fn test_clean_exit_is_restarted() {
    let supervisor = Supervisor::new(fast());
    supervisor.add_process("oneshot", ProcessSpec::new("true"), true).await.unwrap();
    supervisor.start().await.unwrap();

    let sup = &supervisor;
    let restarted = eventually(|| async move { sup.restart_count("oneshot").await.unwrap_or(0) >= 2 }).await;
    assert!(restarted, "exited process was not restarted");
    supervisor.stop().await;
}

#[tokio::test]
async fn test_removed_process_stays_gone() {
    let supervisor = Supervisor::new(fast());
    supervisor.add_process("keep", sleeper(), false).await.unwrap();
    supervisor.add_process("drop", sleeper(), false).await.unwrap();
    supervisor.start().await.unwrap();
    let dropped_pid = supervisor.pid("drop").await.unwrap();

    supervisor.remove_process("drop").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(supervisor.names().await, vec!["keep"]);
    assert!(!supervisor.is_alive("drop").await);
    assert_eq!(supervisor.pid("drop").await, None);
    // SAFETY: signal 0 only checks that the pid exists
    let exists = unsafe { libc::kill(dropped_pid as libc::pid_t, 0) };
    assert_eq!(exists, -1, "removed process still running");
    assert!(supervisor.is_alive("keep").await);

    supervisor.stop().await;
}
