//! Runs an honest baseline and a selfish-mining run side by side and
//! prints the per-miner tables.

use std::error::Error;

use fork_sim::prelude::*;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    let mut group = SimulationGroup::new();
    for selfish in [false, true] {
        group.add(
            SimulationBuilder::new()
                .nodes(12)
                .seed(7)
                .selfish(selfish)
                .adversary_hash_power(0.3)
                .adversary_gamma(0.5)
                .end_time(10_000.0)
                .build()?,
        );
    }

    for output in group.run_all() {
        let label = if output.config.selfish { "selfish" } else { "honest" };
        println!("== {label} run ==");
        println!("{}", SimulationResults::new(&output));
    }
    Ok(())
}
