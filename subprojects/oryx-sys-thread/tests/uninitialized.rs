//! Behavior before `initialize` runs. Kept in its own test binary so no
//! other test can have initialized the substrate in this process.

use oryx_sys_thread::CreateError;

#[test]
fn everything_is_inert_before_initialize() {
    assert!(oryx_sys_thread::current_block().is_none());
    assert!(oryx_sys_thread::current_tla().is_none());
    assert!(oryx_sys_thread::current_descriptor().is_none());

    assert!(matches!(
        oryx_sys_thread::create_for_existing_thread(0),
        Err(CreateError::NotInitialized)
    ));
    assert!(matches!(
        oryx_sys_thread::create(1, None, 1024 * 1024),
        Err(CreateError::NotInitialized)
    ));

    // Failed creation leaves no registration behind.
    assert!(oryx_sys_thread::current_block().is_none());
}
