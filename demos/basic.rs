use std::sync::Arc;

use fme_core::{EvaluatorBuilder, InMemoryStorage, Settings, UserContext};

fn main() {
    let settings = Settings::from_file("demos/settings.json").expect("failed to load settings");
    let storage = Arc::new(InMemoryStorage::new());
    let evaluator = EvaluatorBuilder::new()
        .settings(Arc::new(settings))
        .storage(storage.clone())
        .build();

    let users = [
        UserContext::new("alice").custom_variable("plan", "pro"),
        UserContext::new("bob").custom_variable("plan", "free"),
        UserContext::new("qa-tester").custom_variable("plan", "professional"),
    ];

    for user in &users {
        for feature in ["new_checkout", "loyalty_banner", "free_shipping"] {
            let decision = evaluator.evaluate(feature, user);
            match decision.variable("button_color") {
                Some(color) => println!("{:>10} | {decision} | button_color={color}", user.id()),
                None => println!("{:>10} | {decision}", user.id()),
            }
        }
    }

    println!("Persisted decisions: {}", storage.len());
}
