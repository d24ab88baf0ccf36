//! `autopilot check`

use autopilot_core::check::check_environment;

pub fn execute() {
    let result = check_environment();

    for warning in &result.warnings {
        println!("  ! {}", warning);
    }
    for err in &result.errors {
        eprintln!("  ✗ {}", err);
    }

    if result.ok {
        println!("  ✓ environment ok");
    } else {
        eprintln!("\nPlease install the missing dependencies and try again.");
        std::process::exit(1);
    }
}
