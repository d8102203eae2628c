fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc unless the environment already provides one
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["proto/deviceplugin/v1beta1/api.proto"],
            &["proto/deviceplugin/v1beta1"],
        )?;

    println!("cargo:rerun-if-changed=proto/deviceplugin/v1beta1/api.proto");
    Ok(())
}
