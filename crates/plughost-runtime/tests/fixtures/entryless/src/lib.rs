//! Library passing the ABI check without exporting a module

/// Same value as `plughost_api::ABI_VERSION`
#[no_mangle]
pub extern "C" fn plughost_abi_version() -> u32 {
    1
}
