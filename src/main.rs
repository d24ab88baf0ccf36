mod cli;

use std::io;

use clap::Parser;

use cli::Cli;

fn main() -> io::Result<()> {
    autopilot_core::logging::init();

    // 解析命令行参数
    let cli = Cli::parse();

    // 统一调度
    cli::dispatch(cli.command)
}
