use ffnn_fit::{DerivFlags, Network};

fn main() -> ffnn_fit::Result<()> {
    let mut net = Network::from_description(&[
        vec!["ID", "ID", "ID"],
        vec!["ID", "TANS", "GSS", "LGS"],
        vec!["ID", "ID"],
    ])?;
    net.connect()?;
    net.set_parameters(&(0..net.nparams()).map(|p| 0.1 * p as f64 - 0.5).collect::<Vec<_>>())?;
    net.add_substrates(DerivFlags::D1 | DerivFlags::VD1);

    std::fs::create_dir_all("target").map_err(|e| ffnn_fit::Error::Io(e.to_string()))?;
    let path = "target/tmp_network.txt";
    net.save_text(path)?;
    let loaded = Network::load_text(path)?;
    println!("{}", loaded.to_text_string());

    let mut a = net;
    let mut b = loaded;
    for n in [&mut a, &mut b] {
        n.set_input(&[0.3, -0.7])?;
        n.propagate()?;
    }
    println!("original y={} loaded y={}", a.output(0)?, b.output(0)?);

    #[cfg(feature = "serde")]
    {
        let json = b.to_json_string_pretty()?;
        let again = Network::from_json_str(&json)?;
        println!("json round trip keeps {} parameters", again.nparams());
    }
    Ok(())
}
