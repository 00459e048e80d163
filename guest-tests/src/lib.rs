//! In-guest test harness. Test bodies are tagged `#[guest_test]`
//! (from `guest-tests-macros`) wherever they live — typically in the
//! demo guest binary, since they need the `guest` bindings crate — and
//! each tagged function registers a `TestRegistration` into the
//! `.guest_tests` linker section. [`run`] walks that section end to
//! end and invokes every test in link order.
//!
//! There is no host process to catch a panic here: the guest panic
//! handler halts the VM on the first failing assertion, so "all tests
//! ran to completion" is itself the pass signal. A host-side
//! integration test builds the demo guest with the `selftest` feature,
//! runs it under the real tender, and asserts on the guest's exit
//! status and captured console output.
#![no_std]

pub use guest_tests_macros::guest_test;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct TestName {
    ptr: *const u8,
    len: usize,
}

impl TestName {
    pub const fn new(name: &'static str) -> Self {
        Self {
            ptr: name.as_ptr(),
            len: name.len(),
        }
    }

    pub fn as_str(self) -> &'static str {
        unsafe { core::str::from_utf8_unchecked(core::slice::from_raw_parts(self.ptr, self.len)) }
    }
}

unsafe impl Sync for TestName {}

#[repr(C)]
pub struct TestRegistration {
    pub name: TestName,
    pub run: extern "C" fn(),
}

unsafe impl Sync for TestRegistration {}

#[cfg(target_os = "none")]
unsafe extern "C" {
    static __start_guest_tests: TestRegistration;
    static __stop_guest_tests: TestRegistration;
}

fn registered_tests() -> &'static [TestRegistration] {
    #[cfg(not(target_os = "none"))]
    {
        &[]
    }

    #[cfg(target_os = "none")]
    unsafe {
        let start = core::ptr::addr_of!(__start_guest_tests);
        let stop = core::ptr::addr_of!(__stop_guest_tests);
        let bytes = (stop as usize).saturating_sub(start as usize);
        let len = bytes / core::mem::size_of::<TestRegistration>();
        core::slice::from_raw_parts(start, len)
    }
}

/// Runs every registered test in link order and reports progress
/// through `report`. Returns the number of tests run; a panic inside
/// any test aborts the whole guest before this can return, so the
/// caller only needs to act on a clean return.
pub fn run(mut report: impl FnMut(&str)) -> usize {
    let tests = registered_tests();
    for test in tests {
        report(test.name.as_str());
        (test.run)();
    }
    tests.len()
}
