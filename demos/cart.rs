//! Demonstration of slice subscriptions over a shared store

use global_states::{wrap_with_slice, Component, Connected, Props, Store, Value};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn greeting(props: &Props) -> String {
    let name = props
        .get("user")
        .and_then(|user| user.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("stranger");
    let parent = props.get("parentProp").and_then(Value::as_str).unwrap_or("");
    format!("Hi {name} {parent}")
}

fn cart_summary(props: &Props) -> String {
    let cart = props.get("cart");
    let items = cart
        .and_then(|cart| cart.get("items"))
        .and_then(Value::as_sequence)
        .map_or(0, <[Value]>::len);
    let quantity = cart
        .and_then(|cart| cart.get("quantity"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    format!("{items} item(s), quantity {quantity}")
}

fn main() -> global_states::Result<()> {
    println!("=== Global States Example: Cart ===\n");

    let store = Store::global();
    let update_user = store.update_sub_property("user");
    let update_cart = store.update_sub_property("cart");

    println!("1. Connecting components");
    let renders = Arc::new(AtomicUsize::new(0));
    let greeter = {
        let renders = renders.clone();
        Connected::with_listener(&store, ["user"], greeting, move |slice| {
            renders.fetch_add(1, Ordering::SeqCst);
            println!("   [greeter re-render] slice keys: {:?}", slice.keys().collect::<Vec<_>>());
        })
    };
    let cart = wrap_with_slice(&store, ["cart"], cart_summary);
    let own: Props = [("parentProp".to_string(), Value::from("(from parent)"))]
        .into_iter()
        .collect();

    println!("\n2. Setting the user");
    update_user.apply(json!({"name": "you"}))?;
    println!("   {}", greeter.render(&own));

    println!("\n3. Changing the cart (greeter stays quiet)");
    update_cart.apply(json!({"items": ["apple"]}))?;
    update_cart.apply(json!({"quantity": 5}))?;
    println!("   {}", cart.render(&Props::new()));

    println!("\n4. Greeting everyone");
    update_user.apply(json!({"name": "everyone"}))?;
    println!("   {}", greeter.render(&own));

    println!("\n5. Rejected payload");
    if let Err(err) = store.update(json!([1, 2, 3])) {
        println!("   {err}");
    }

    println!("\nGreeter re-rendered {} time(s)", renders.load(Ordering::SeqCst));
    println!("\n✓ Example complete!");
    Ok(())
}
