// build.rs
fn main() {
    // Generate build info (git revision is logged at debug level on startup)
    vergen::EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
        .expect("Unable to generate build info");
}
