fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The operator only calls the storage daemon, it never serves the API
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/role.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/role.proto");

    Ok(())
}
