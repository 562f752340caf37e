//! XOR example using the NEAT breeder.
//!
//! Evolves a population of networks against the XOR truth table, the
//! classic benchmark for neuroevolution. Settings are read from a small
//! parameter file so the example doubles as a configuration walkthrough.
//!
//! Run with: `cargo run --example xor`

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use symbios_breed::{BreedResult, NeatBreeder, NeatConfig, NeatGenome, Network, Parameters};

const PARAMS: &str = "
# XOR needs two inputs, one output and room to grow hidden nodes.
neat.num-inputs = 2
neat.num-outputs = 1
neat.pop-size = 150
neat.mutate-add-node-prob = 0.03
neat.mutate-add-link-prob = 0.05
neat.compat-threshold = 3.0
";

const TRUTH_TABLE: [([f32; 2], f32); 4] = [
    ([0.0, 0.0], 0.0),
    ([0.0, 1.0], 1.0),
    ([1.0, 0.0], 1.0),
    ([1.0, 1.0], 0.0),
];

/// Squared distance from the worst possible total error; 16.0 is perfect.
fn xor_fitness(genome: &NeatGenome) -> f32 {
    let Ok(mut net) = Network::from_genome(genome) else {
        return 0.0;
    };
    let mut error = 0.0;
    for (inputs, expected) in &TRUTH_TABLE {
        match net.evaluate(inputs) {
            Ok(out) => error += (out[0] - expected).abs(),
            Err(_) => return 0.0,
        }
    }
    (4.0 - error).powi(2)
}

fn main() -> BreedResult<()> {
    println!("NEAT XOR Example");
    println!("================\n");

    let params = Parameters::parse(PARAMS)?;
    let mut config = NeatConfig::default();
    config.setup(&params, &NeatConfig::default_base())?;

    let generations = 100;
    let seed = 42;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut breeder = NeatBreeder::spawn_population(config, &mut rng);

    println!("Population: {}", breeder.config.pop_size);
    println!("Generations: {}", generations);
    println!();

    let mut solution_generation = None;
    for gen in 0..generations {
        breeder.evaluate(xor_fitness);
        let Some(best) = breeder.best() else {
            break;
        };

        // Every case on the right side of 0.5.
        let solved = best.fitness >= 15.0;
        if gen % 10 == 0 || solved {
            let avg: f32 =
                breeder.population().map(|m| m.fitness).sum::<f32>() / breeder.population_len() as f32;
            println!(
                "Gen {:3}: best={:.4}, avg={:.4}, species={}, hidden={}, links={}",
                gen,
                best.fitness,
                avg,
                breeder.species.len(),
                best.genome.num_hidden(),
                best.genome.num_enabled_genes()
            );
        }
        if solved {
            solution_generation = Some(gen);
            break;
        }
        breeder.breed(&mut rng)?;
    }

    println!();
    let Some(champion) = breeder.best() else {
        return Ok(());
    };
    println!("Evolution Complete!");
    println!("==================");
    println!("Best fitness: {:.4}", champion.fitness);
    println!("Nodes: {}", champion.genome.nodes.len());
    println!("Links: {}", champion.genome.num_enabled_genes());
    println!("Innovations recorded: {}", breeder.ledger.len());
    if let Some(gen) = solution_generation {
        println!("Solution found at generation: {}", gen);
    }

    println!("\nChampion XOR outputs:");
    let mut net = Network::from_genome(&champion.genome)?;
    for (inputs, expected) in &TRUTH_TABLE {
        let output = net.evaluate(inputs)?[0];
        let rounded = if output > 0.5 { 1.0 } else { 0.0 };
        let status = if (rounded - expected).abs() < 0.1 { "✓" } else { "✗" };
        println!(
            "  {} XOR {} = {:.4} (expected {}) {}",
            inputs[0] as i32, inputs[1] as i32, output, *expected as i32, status
        );
    }
    Ok(())
}
