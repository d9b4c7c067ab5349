fn main() -> Result<(), Box<dyn std::error::Error>> {
    // fall back to the vendored compiler when the host has no protoc
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::compile_protos("proto/grpc_predict_v2.proto")?;
    Ok(())
}
