// params.rs — Test-fixture loader for free-form transform parameters.
//
// Fixture files carry ONE decimal value per control node, whitespace
// separated. The loader broadcasts that scalar across all three axis
// blocks, producing an isotropic displacement field. This is a
// constraint of the fixture format only — the engine's transform model
// keeps independent per-axis coefficients, and callers with real
// per-axis fields should call `BSplineTransform::set_parameters`
// directly.

use std::fs;
use std::io;
use std::path::Path;

/// Read `nodes` values from a fixture file and broadcast each across
/// the three axis blocks: result[n] = result[n + nodes] =
/// result[n + 2·nodes] = file value n.
///
/// Fails with `InvalidData` when the file holds fewer than `nodes`
/// parseable values or any token is not a number; surplus trailing
/// values are ignored.
pub fn load_broadcast_parameters(path: &Path, nodes: usize) -> io::Result<Vec<f32>> {
    let text = fs::read_to_string(path)?;
    let mut values = Vec::with_capacity(nodes);
    for token in text.split_whitespace().take(nodes) {
        let v: f32 = token.parse().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad parameter value {token:?}: {e}"),
            )
        })?;
        values.push(v);
    }
    if values.len() < nodes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "parameter file {} holds {} values, need {nodes}",
                path.display(),
                values.len(),
            ),
        ));
    }

    let mut params = vec![0.0f32; 3 * nodes];
    for (n, &v) in values.iter().enumerate() {
        params[n] = v;
        params[n + nodes] = v;
        params[n + 2 * nodes] = v;
    }
    Ok(params)
}
