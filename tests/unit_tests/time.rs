use fieldview::callback::CallbackStatus;
use fieldview::time::TimeKeeper;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn observers_see_each_time() {
    let mut keeper = TimeKeeper::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let id = keeper.add_callback(move |event| {
        sink.borrow_mut().push(event.time);
        CallbackStatus::Keep
    });

    keeper.set_time(0.25);
    keeper.set_time_quiet(0.5);
    keeper.set_time(0.75);
    assert_eq!(*seen.borrow(), vec![0.25, 0.75]);
    assert_eq!(keeper.time(), 0.75);

    assert!(keeper.remove_callback(id));
    keeper.set_time(1.0);
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn invalid_ranges_are_rejected() {
    let mut keeper = TimeKeeper::new();
    assert_eq!((keeper.minimum(), keeper.maximum()), (0.0, 1.0));
    assert!(!keeper.set_range(2.0, 1.0));
    assert_eq!((keeper.minimum(), keeper.maximum()), (0.0, 1.0));
    assert!(keeper.set_range(-1.0, 3.0));
    assert_eq!((keeper.minimum(), keeper.maximum()), (-1.0, 3.0));
}

#[test]
fn callbacks_removing_themselves_run_once() {
    let mut keeper = TimeKeeper::new();
    let calls = Rc::new(RefCell::new(0));
    let counter = calls.clone();
    keeper.add_callback(move |_| {
        *counter.borrow_mut() += 1;
        CallbackStatus::Remove
    });
    keeper.set_time(0.1);
    keeper.set_time(0.2);
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn setting_the_same_time_notifies_again() {
    let mut keeper = TimeKeeper::new();
    let calls = Rc::new(RefCell::new(0));
    let counter = calls.clone();
    keeper.add_callback(move |_| {
        *counter.borrow_mut() += 1;
        CallbackStatus::Keep
    });
    keeper.set_time(0.5);
    keeper.set_time(0.5);
    assert_eq!(*calls.borrow(), 2);
}
