//! Runs the code-execution worker service.
//!
//! Configuration is provided via `WORKER_*` environment variables parsed by
//! [`OrthoConfig`](https://github.com/leynos/ortho-config). The binary exits
//! with status code `0` on success and `1` on error.

fn main() -> color_eyre::eyre::Result<()> {
    code_exec_worker::run()
}
