fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Prefer a protoc from the environment, fall back to the vendored binary
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&["proto/grpcproxy/v1/proxy.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto");
    Ok(())
}
