fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure().compile_protos(
        &[
            "proto/agntcy/dir/v1/record.proto",
            "proto/agntcy/dir/v1/store.proto",
            "proto/agntcy/dir/v1/search.proto",
            "proto/agntcy/dir/v1/sync.proto",
            "proto/agntcy/dir/v1/naming.proto",
            "proto/agntcy/dir/v1/sign.proto",
        ],
        &["proto"],
    )?;
    Ok(())
}
