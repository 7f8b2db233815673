use stress_test::{stress_test_requests, stress_test_scaling};

fn main() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {

    // Run async stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC STRESS TESTS                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Test 1: writes only, one variable
    let stats = stress_test_requests(4, 1, 500, 0.0).await;
    stats.print();

    // Test 2: mixed writes and CAS, several variables
    let stats = stress_test_requests(4, 4, 2000, 0.3).await;
    stats.print();

    // Test 3: larger cluster
    let stats = stress_test_requests(10, 8, 5000, 0.2).await;
    stats.print();

    // Test 4: Scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    stress_test_scaling(20, 4).await;

    println!("\n✓ All stress tests completed successfully!");
}
