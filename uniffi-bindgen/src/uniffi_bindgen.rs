//! Generates Kotlin and Swift bindings for `datakey-core` (built with `--features ffi`).

fn main() {
    uniffi::uniffi_bindgen_main();
}
