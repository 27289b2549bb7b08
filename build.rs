use cc;

// Compile the C TAP wrappers into a library that will be linked to the Rust
// code.
fn main() {
    println!("cargo::rerun-if-changed=src/tap.c");
    cc::Build::new()
        .file("src/tap.c")
        .compile("tap");
}
