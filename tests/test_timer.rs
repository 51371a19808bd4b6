use etude::timer::TimerQueue;

#[test]
fn io_reset_pattern_fires_only_the_last_deadline() {
    let mut q = TimerQueue::new();

    // A connection seeing I/O repeatedly: each event cancels the old timer
    // and arms a new one. Only the final deadline may fire.
    let h = q.schedule_at(7, 500);
    h.cancel();
    let h = q.schedule_at(7, 600);
    h.cancel();
    let _h = q.schedule_at(7, 700);

    let mut fired = Vec::new();
    q.expire_at(650, |t| fired.push(t));
    assert!(fired.is_empty());

    q.expire_at(700, |t| fired.push(t));
    assert_eq!(fired, vec![7]);
    assert!(q.is_empty());
}

#[test]
fn expiry_respects_heap_order_under_mixed_operations() {
    let mut q = TimerQueue::new();

    let _a = q.schedule_at(1, 900);
    let b = q.schedule_at(2, 100);
    let _c = q.schedule_at(3, 400);
    let _d = q.schedule_at(4, 250);
    b.cancel();

    // The cancelled root never fires and the rest come out in deadline
    // order, regardless of insertion order.
    let mut fired = Vec::new();
    q.expire_at(300, |t| fired.push(t));
    assert_eq!(fired, vec![4]);

    q.expire_at(1000, |t| fired.push(t));
    assert_eq!(fired, vec![4, 3, 1]);
}

#[test]
fn next_timeout_tracks_the_live_minimum() {
    let mut q = TimerQueue::new();

    let a = q.schedule_at(1, 120);
    let _b = q.schedule_at(2, 480);
    assert_eq!(q.next_timeout_at(100), 20);

    a.cancel();
    assert_eq!(q.next_timeout_at(100), 380);

    // Past-due live timers ask for an immediate poll return.
    assert_eq!(q.next_timeout_at(9_999), 0);
}

#[test]
fn wall_clock_schedule_and_expire() {
    let mut q = TimerQueue::new();
    let _h = q.schedule(1, 10);

    let mut fired = Vec::new();
    q.expire(|t| fired.push(t));
    assert!(fired.is_empty(), "timer fired before its deadline");

    std::thread::sleep(std::time::Duration::from_millis(30));
    q.expire(|t| fired.push(t));
    assert_eq!(fired, vec![1]);
}
