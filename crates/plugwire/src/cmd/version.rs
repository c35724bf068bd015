use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("plugwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: plugwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("PLUGWIRE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("PLUGWIRE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("protocol: {}", plugwire_net::HandshakeConfig::default().protocol_version);
    println!("register_channel: {}", plugwire_frame::REGISTER_CHANNEL);
    println!("max_frame_size: {}", plugwire_frame::DEFAULT_MAX_FRAME);
    println!("features: net={}, cli=true", cfg!(feature = "net"));

    Ok(SUCCESS)
}
