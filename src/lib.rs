/*!
Discrete-event simulation of fork dynamics in a proof-of-work
peer-to-peer ledger.

Peers mine over a randomly generated topology, exchange transactions and
blocks with size-dependent latency, and resolve forks by longest chain
with first-seen tie-breaking. Adversarial peers can run the selfish or
stubborn mining strategies, withholding blocks on a private branch and
releasing them against public progress.

```
use fork_sim::prelude::*;

let simulation = SimulationBuilder::new()
    .nodes(12)
    .selfish(true)
    .adversary_hash_power(0.3)
    .end_time(5_000.0)
    .seed(7)
    .build()?;

let output = simulation.run();
println!("{}", SimulationResults::new(&output));
# Ok::<(), fork_sim::simulation::SimulationBuildError>(())
```

Runs are deterministic: the same configuration and seed reproduce the
same event order, chains, and logs.
*/

pub mod block;
pub mod block_tree;
pub mod chain;
pub mod config;
pub mod network;
pub mod node;
pub mod prelude;
pub mod simulation;
pub mod strategy;
pub mod transaction;
