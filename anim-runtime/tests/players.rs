//! 播放器生命周期与组合播放器

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use anim_runtime::player::{flatten_group_players, optimize_group_player};
use anim_runtime::testing::MockAnimationPlayer;
use anim_runtime::{
    AnimationGroupPlayer, AnimationPlayer, ElementId, MicrotaskQueue, NoopAnimationPlayer, PlayerCallback,
    PlayerState,
};

fn mock(duration: f64, delay: f64) -> Rc<MockAnimationPlayer> {
    Rc::new(MockAnimationPlayer::new(ElementId(1), Vec::new(), duration, delay, None, &[], None))
}

fn boxed(duration: f64) -> Rc<dyn AnimationPlayer> {
    mock(duration, 0.0)
}

fn counter() -> (Rc<Cell<usize>>, PlayerCallback) {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    (count, Rc::new(move || c.set(c.get() + 1)))
}

#[test]
fn test_destroy_before_play_fires_every_phase_once() {
    let player = mock(100.0, 0.0);
    let order = Rc::new(RefCell::new(Vec::new()));
    let record = |name: &'static str| -> PlayerCallback {
        let o = order.clone();
        Rc::new(move || o.borrow_mut().push(name))
    };
    player.on_destroy(record("destroy"));
    player.on_done(record("done"));
    player.on_start(record("start"));

    player.destroy();
    player.destroy();
    assert_eq!(*order.borrow(), ["start", "done", "destroy"]);
    assert_eq!(player.state(), PlayerState::Destroyed);
}

#[test]
fn test_group_finishes_exactly_once() {
    let queue = MicrotaskQueue::new();
    let a = mock(100.0, 0.0);
    let b = mock(300.0, 50.0);
    let c = mock(200.0, 0.0);
    let group = AnimationGroupPlayer::new(
        vec![a.clone() as Rc<dyn AnimationPlayer>, b.clone(), c.clone()],
        &queue,
    );
    assert_eq!(group.total_time(), 350.0);

    let listeners: Vec<_> = (0..3).map(|_| counter()).collect();
    for (_, on_done) in &listeners {
        group.on_done(on_done.clone());
    }
    let fired = || listeners.iter().map(|(count, _)| count.get()).collect::<Vec<_>>();
    group.play();

    c.finish();
    assert_eq!(fired(), [0, 0, 0]);
    a.finish();
    assert_eq!(fired(), [0, 0, 0]);
    b.finish();
    assert_eq!(fired(), [1, 1, 1]);

    group.finish();
    group.destroy();
    assert_eq!(fired(), [1, 1, 1]);
}

#[test]
fn test_group_position_follows_longest_child() {
    let queue = MicrotaskQueue::new();
    let short = mock(100.0, 0.0);
    let long = mock(300.0, 0.0);
    let long_too = mock(300.0, 0.0);
    let group = AnimationGroupPlayer::new(
        vec![short.clone() as Rc<dyn AnimationPlayer>, long.clone(), long_too.clone()],
        &queue,
    );

    group.set_position(0.5);
    assert_eq!(short.get_position(), 1.0);
    assert_eq!(long.get_position(), 0.5);
    long_too.set_position(0.8);
    assert_eq!(group.get_position(), 0.5);
}

#[test]
fn test_group_position_tie_goes_to_first_child() {
    let queue = MicrotaskQueue::new();
    let first = mock(200.0, 0.0);
    let second = mock(150.0, 50.0);
    let group = AnimationGroupPlayer::new(vec![first.clone() as Rc<dyn AnimationPlayer>, second.clone()], &queue);

    first.set_position(0.2);
    second.set_position(0.7);
    assert_eq!(group.get_position(), 0.2);
}

#[test]
fn test_empty_group_position_is_zero() {
    let queue = MicrotaskQueue::new();
    let group = AnimationGroupPlayer::new(Vec::new(), &queue);
    assert_eq!(group.get_position(), 0.0);
}

#[test]
fn test_group_starts_when_all_children_start() {
    let queue = MicrotaskQueue::new();
    let a = mock(100.0, 0.0);
    let b = mock(100.0, 0.0);
    let group = AnimationGroupPlayer::new(vec![a.clone() as Rc<dyn AnimationPlayer>, b.clone()], &queue);
    let (started, on_start) = counter();
    group.on_start(on_start);

    a.play();
    assert_eq!(started.get(), 0);
    b.play();
    assert_eq!(started.get(), 1);
}

#[test]
fn test_empty_group_completes_on_next_microtask() {
    let queue = MicrotaskQueue::new();
    let group = AnimationGroupPlayer::new(Vec::new(), &queue);
    let (done, on_done) = counter();
    group.on_done(on_done);

    assert_eq!(done.get(), 0);
    queue.run_until_idle();
    assert_eq!(done.get(), 1);
}

#[test]
fn test_noop_player_finishes_asynchronously() {
    let queue = MicrotaskQueue::new();
    let player = NoopAnimationPlayer::new(0.0, 0.0, &queue);
    let (done, on_done) = counter();
    player.on_done(on_done);

    player.play();
    assert!(player.has_started());
    assert_eq!(done.get(), 0);
    queue.run_until_idle();
    assert_eq!(done.get(), 1);
}

#[test]
fn test_zero_length_player_position_is_pinned() {
    let queue = MicrotaskQueue::new();
    let player = NoopAnimationPlayer::new(0.0, 0.0, &queue);
    player.set_position(0.25);
    assert_eq!(player.get_position(), 1.0);

    let timed = mock(200.0, 0.0);
    timed.set_position(0.25);
    assert_eq!(timed.get_position(), 0.25);
}

#[test]
fn test_reset_restores_callbacks() {
    let player = mock(100.0, 0.0);
    let (started, on_start) = counter();
    player.on_start(on_start);

    player.play();
    player.reset();
    assert_eq!(player.state(), PlayerState::Pending);
    player.play();
    assert_eq!(started.get(), 2);
}

#[test]
fn test_optimize_and_flatten() {
    let queue = MicrotaskQueue::new();
    let empty = optimize_group_player(Vec::new(), &queue);
    assert_eq!(empty.total_time(), 0.0);

    let single = boxed(10.0);
    let same = optimize_group_player(vec![single.clone()], &queue);
    assert!(Rc::ptr_eq(&same, &single));

    let inner = optimize_group_player(vec![boxed(10.0), boxed(20.0)], &queue);
    let outer = optimize_group_player(vec![inner, boxed(30.0)], &queue);
    assert_eq!(outer.child_players().len(), 2);
    assert_eq!(flatten_group_players(&[outer]).len(), 3);
}
