//! Library claiming a plugin ABI newer than any host understands

#[no_mangle]
pub extern "C" fn plughost_abi_version() -> u32 {
    u32::MAX
}

/// Never reached; the host stops at the version check
#[no_mangle]
pub extern "C" fn plughost_module() -> *mut u8 {
    std::ptr::null_mut()
}
