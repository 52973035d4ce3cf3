use super::*;

const PEER: UserId = UserId(2);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn burst_of_keystrokes_emits_one_start_and_one_stop() {
    let mut debouncer = TypingDebouncer::default();
    let t0 = Instant::now();

    let started: Vec<_> = [0, 200, 400, 900]
        .into_iter()
        .filter_map(|offset| debouncer.on_input(Some(PEER), t0 + ms(offset)))
        .collect();
    assert_eq!(
        started,
        vec![TypingSignal {
            receiver_id: PEER,
            is_typing: true
        }]
    );

    assert_eq!(debouncer.deadline(), Some(t0 + ms(1900)));
    assert_eq!(debouncer.poll_idle(t0 + ms(1899)), None);
    assert_eq!(
        debouncer.poll_idle(t0 + ms(1900)),
        Some(TypingSignal {
            receiver_id: PEER,
            is_typing: false
        })
    );
    assert_eq!(debouncer.poll_idle(t0 + ms(5000)), None);
    assert!(!debouncer.is_typing());
}

#[tokio::test(start_paused = true)]
async fn no_signal_without_active_peer() {
    let mut debouncer = TypingDebouncer::default();

    assert_eq!(debouncer.on_input(None, Instant::now()), None);
    assert_eq!(debouncer.deadline(), None);
    assert_eq!(debouncer.on_message_sent(None), None);
}

#[tokio::test(start_paused = true)]
async fn sending_forces_stop_regardless_of_timer() {
    let mut debouncer = TypingDebouncer::default();
    let now = Instant::now();
    debouncer.on_input(Some(PEER), now);

    let stopped = debouncer.on_message_sent(Some(PEER));

    assert_eq!(
        stopped,
        Some(TypingSignal {
            receiver_id: PEER,
            is_typing: false
        })
    );
    assert_eq!(debouncer.poll_idle(now + ms(2000)), None);

    // Idle but with a peer selected: still announces stop.
    assert_eq!(
        debouncer.on_message_sent(Some(PEER)).map(|s| s.is_typing),
        Some(false)
    );
}

#[tokio::test(start_paused = true)]
async fn switching_peer_mid_burst_restarts_for_new_peer() {
    let mut debouncer = TypingDebouncer::default();
    let now = Instant::now();
    debouncer.on_input(Some(PEER), now);

    let started = debouncer.on_input(Some(UserId(3)), now + ms(100));

    assert_eq!(started.map(|s| s.receiver_id), Some(UserId(3)));
    assert_eq!(
        debouncer.reset().map(|s| (s.receiver_id, s.is_typing)),
        Some((UserId(3), false))
    );
    assert_eq!(debouncer.reset(), None);
}
