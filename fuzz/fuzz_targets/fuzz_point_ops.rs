#![no_main]
use libfuzzer_sys::{fuzz_target, arbitrary::{Arbitrary, Unstructured}};
use specstore::{Dataset, DatasetSpec, LayoutKind, StoreConfig};

#[derive(Debug, Arbitrary)]
enum PointOp {
    Write { index: Vec<u8>, value: f32 },
    Read { index: Vec<u8> },
    Resize { sizes: Vec<u8> },
    Zero,
}

// Out-of-range indices and shapes must surface as errors
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let sizes: Vec<u8> = match u.arbitrary() {
        Ok(sizes) => sizes,
        Err(_) => return,
    };
    let sizes: Vec<usize> = sizes.iter().take(4).map(|&s| (s % 16) as usize).collect();
    let layout = match u.arbitrary::<u8>().unwrap_or(0) % 3 {
        0 => LayoutKind::FullMatrix,
        1 => LayoutKind::BlockMatrix,
        _ => LayoutKind::Submatrix,
    };
    let ops: Vec<PointOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let config = StoreConfig::default().with_block_target_elements(8);
    let mut data = match Dataset::create_in_memory(DatasetSpec::new(&sizes).layout(layout), &config) {
        Ok(d) => d,
        Err(_) => return,
    };

    for op in ops.iter().take(32) {
        match op {
            PointOp::Write { index, value } => {
                let index: Vec<usize> = index.iter().map(|&i| i as usize).collect();
                if value.is_finite() && data.write_point(&index, *value as f64).is_ok() {
                    assert_eq!(data.read_point(&index).unwrap(), *value as f64);
                }
            }
            PointOp::Read { index } => {
                let index: Vec<usize> = index.iter().map(|&i| i as usize).collect();
                let _ = data.read_point(&index);
            }
            PointOp::Resize { sizes } => {
                let sizes: Vec<usize> = sizes.iter().map(|&s| (s % 16) as usize).collect();
                let _ = data.resize(&sizes);
            }
            PointOp::Zero => {
                data.zero_all().unwrap();
                assert_eq!(data.sum_all().unwrap(), 0.0);
            }
        }
    }
});
