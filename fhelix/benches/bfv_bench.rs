use criterion::{criterion_group, criterion_main, Criterion};
use fhelix::bfv::{
	BatchEncoder, BfvParametersBuilder, Encryptor, Evaluator, KeyGenerator,
};

fn bfv_bench(c: &mut Criterion) {
	let params = BfvParametersBuilder::new()
		.log_n(12)
		.plaintext_modulus(65537)
		.moduli_sizes(&[54, 54, 54])
		.build()
		.unwrap();
	let mut keygen = KeyGenerator::new(&params);
	let sk = keygen.gen_secret_key();
	let rlk = keygen.gen_relinearization_key(&sk, 2);
	let encoder = BatchEncoder::new(&params).unwrap();
	let encryptor = Encryptor::new(&params, &sk);
	let mut evaluator = Evaluator::new(&params).unwrap();

	let values: Vec<u64> = (0..4096u64).map(|i| i % 65537).collect();
	let ct = encryptor.encrypt(&encoder.encode(&values).unwrap()).unwrap();

	c.bench_function("bfv/add", |b| {
		b.iter(|| evaluator.add(&ct, &ct).unwrap())
	});
	c.bench_function("bfv/mul", |b| {
		b.iter(|| evaluator.mul(&ct, &ct).unwrap())
	});
	let prod = evaluator.mul(&ct, &ct).unwrap();
	c.bench_function("bfv/relinearize", |b| {
		b.iter(|| evaluator.relinearize(&prod, &rlk).unwrap())
	});
}

criterion_group!(benches, bfv_bench);
criterion_main!(benches);
