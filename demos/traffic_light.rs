//! Traffic Light Engine
//!
//! This example drives a cyclic traffic light with condition timers.
//!
//! Key concepts:
//! - Each light is a stable point; a timer releases it
//! - Only the timer for the current light is ever armed
//! - Enter hooks observe every change
//!
//! Run with: cargo run --example traffic_light

use convergent::builder::EngineBuilder;
use convergent::core::{Condition, State};
use convergent::engine::{from_fns, Engine};
use convergent::state_enum;
use std::thread;
use std::time::Duration;

state_enum! {
    enum TrafficLight {
        Red,
        Yellow,
        Green,
    }
}

type Light = Engine<TrafficLight, TrafficLight>;

fn following(light: &TrafficLight) -> TrafficLight {
    match light {
        TrafficLight::Red => TrafficLight::Green,
        TrafficLight::Green => TrafficLight::Yellow,
        TrafficLight::Yellow => TrafficLight::Red,
    }
}

fn main() {
    println!("=== Traffic Light Engine ===\n");

    let engine: Light = EngineBuilder::new()
        .initial(TrafficLight::Red)
        .goal(TrafficLight::Yellow)
        .label("crossing")
        .strategy(from_fns(
            |light: &TrafficLight, _goal: &TrafficLight, engine: &Light| {
                engine.set_state(following(light));
                true
            },
            |light: &TrafficLight, goal: &TrafficLight| light == goal,
        ))
        .build()
        .unwrap();

    for (light, millis) in [
        (TrafficLight::Green, 300),
        (TrafficLight::Yellow, 100),
        (TrafficLight::Red, 200),
    ] {
        engine
            .set_evolve_timer(Condition::exact(light), Duration::from_millis(millis))
            .unwrap();
    }
    for light in TrafficLight::ALL {
        let name = light.name().to_string();
        engine.set_enter_hook(Condition::exact(light.clone()), move || {
            println!("  -> {name}");
        });
    }

    println!("Initial light: {:?}", engine.state());
    println!("Holding times: Green 300ms, Yellow 100ms, Red 200ms\n");

    engine.evolve();
    if engine.wait_for_goal(Duration::from_secs(2)) {
        println!("\nReached {:?} for the first time", engine.goal());
    }

    println!("\nLetting the light cycle...");
    thread::sleep(Duration::from_millis(1200));

    engine.stop();
    println!("\nStopped on {:?} after {} changes", engine.state(), engine.history().len());
    println!("\n=== Example Complete ===");
}
