use std::sync::Arc;
use std::thread;

use fme_core::{EvaluatorBuilder, Settings, SharedSettings, UserContext};

fn main() {
    let settings = Settings::from_file("demos/settings.json").expect("failed to load settings");
    let shared = Arc::new(SharedSettings::new(settings.clone()));
    let evaluator = Arc::new(EvaluatorBuilder::new().settings(Arc::clone(&shared)).build());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let e = Arc::clone(&evaluator);
            thread::spawn(move || {
                let mut enabled = 0;
                for n in 0..1000 {
                    let user =
                        UserContext::new(format!("user-{i}-{n}")).custom_variable("plan", "pro");
                    if e.evaluate("new_checkout", &user).is_enabled() {
                        enabled += 1;
                    }
                }
                (i, enabled)
            })
        })
        .collect();

    // Readers keep whichever snapshot they started with.
    shared.replace(settings);

    for handle in handles {
        let (i, enabled) = handle.join().expect("thread panicked");
        println!("Thread {i}: new_checkout enabled for {enabled}/1000 users");
    }
}
