use num_complex::Complex;
use rand::Rng;
use std::f64::consts::FRAC_1_SQRT_2;

/// Ideal statevector simulator. Holds `2^n` amplitudes for `n` allocated
/// qubits, a per-qubit measured flag, and the textual OpenQASM 2.0 log.
pub struct Simulator {
    state: Vec<Complex<f64>>,
    num_qubits: usize,
    measured: Vec<bool>,
    last_outcome: Vec<Option<u8>>,
    ops: Vec<String>,
    log_gates: bool,
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            state: vec![Complex::new(1.0, 0.0)],
            num_qubits: 0,
            measured: Vec::new(),
            last_outcome: Vec::new(),
            ops: Vec::new(),
            log_gates: true,
        }
    }

    /// Per-instance gate-log suppression; the preamble and register
    /// declarations stay so the log remains well-formed.
    pub fn set_logging(&mut self, enabled: bool) {
        self.log_gates = enabled;
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn state_len(&self) -> usize {
        self.state.len()
    }

    /// Extends the state by tensoring with |0⟩ and returns the new index.
    pub fn allocate_qubit(&mut self) -> usize {
        let old_len = self.state.len();
        let mut new_state = vec![Complex::new(0.0, 0.0); old_len * 2];
        new_state[..old_len].copy_from_slice(&self.state);
        self.state = new_state;
        let index = self.num_qubits;
        self.num_qubits += 1;
        self.measured.push(false);
        self.last_outcome.push(None);
        index
    }

    pub fn is_measured(&self, qubit: usize) -> bool {
        self.measured.get(qubit).copied().unwrap_or(false)
    }

    /// `Some(0|1)` once the qubit has been measured since its last reset.
    pub fn last_outcome(&self, qubit: usize) -> Option<u8> {
        self.last_outcome.get(qubit).copied().flatten()
    }

    // ---- single-qubit gates ----

    pub fn h(&mut self, qubit: usize) {
        self.apply_single(qubit, |a, b| {
            ((a + b) * FRAC_1_SQRT_2, (a - b) * FRAC_1_SQRT_2)
        });
        self.log(format!("h q[{}];", qubit));
    }

    pub fn x(&mut self, qubit: usize) {
        self.apply_single(qubit, |a, b| (b, a));
        self.log(format!("x q[{}];", qubit));
    }

    pub fn y(&mut self, qubit: usize) {
        let i = Complex::new(0.0, 1.0);
        self.apply_single(qubit, move |a, b| (-i * b, i * a));
        self.log(format!("y q[{}];", qubit));
    }

    pub fn z(&mut self, qubit: usize) {
        self.apply_single(qubit, |a, b| (a, -b));
        self.log(format!("z q[{}];", qubit));
    }

    pub fn rx(&mut self, qubit: usize, theta: f64) {
        let cos = Complex::new((theta / 2.0).cos(), 0.0);
        let isin = Complex::new(0.0, (theta / 2.0).sin());
        self.apply_single(qubit, move |a, b| (cos * a - isin * b, cos * b - isin * a));
        self.log(format!("rx({}) q[{}];", theta, qubit));
    }

    pub fn ry(&mut self, qubit: usize, theta: f64) {
        let cos = (theta / 2.0).cos();
        let sin = (theta / 2.0).sin();
        self.apply_single(qubit, move |a, b| (a * cos - b * sin, a * sin + b * cos));
        self.log(format!("ry({}) q[{}];", theta, qubit));
    }

    pub fn rz(&mut self, qubit: usize, theta: f64) {
        let phase_0 = Complex::from_polar(1.0, -theta / 2.0);
        let phase_1 = Complex::from_polar(1.0, theta / 2.0);
        self.apply_single(qubit, move |a, b| (phase_0 * a, phase_1 * b));
        self.log(format!("rz({}) q[{}];", theta, qubit));
    }

    /// Swaps amplitudes of basis states differing in the target bit when
    /// the control bit is set.
    pub fn cx(&mut self, control: usize, target: usize) {
        let size = self.state.len();
        for i in 0..size {
            if (i & (1 << control)) != 0 && (i & (1 << target)) == 0 {
                let j = i | (1 << target);
                self.state.swap(i, j);
            }
        }
        self.log(format!("cx q[{}], q[{}];", control, target));
    }

    /// Collapses the qubit, renormalises, sets the measured flag, and logs
    /// the measurement.
    pub fn measure(&mut self, qubit: usize) -> u8 {
        let mut prob_one = 0.0;
        for (i, amp) in self.state.iter().enumerate() {
            if (i & (1 << qubit)) != 0 {
                prob_one += amp.norm_sqr();
            }
        }

        let mut rng = rand::thread_rng();
        let result: u8 = if rng.gen::<f64>() < prob_one { 1 } else { 0 };

        let kept = if result == 1 { prob_one } else { 1.0 - prob_one };
        if kept > 0.0 {
            let norm = 1.0 / kept.sqrt();
            for (i, amp) in self.state.iter_mut().enumerate() {
                let bit = u8::from((i & (1 << qubit)) != 0);
                if bit == result {
                    *amp *= norm;
                } else {
                    *amp = Complex::new(0.0, 0.0);
                }
            }
        }

        self.measured[qubit] = true;
        self.last_outcome[qubit] = Some(result);
        self.log(format!("measure q[{}] -> c[{}];", qubit, qubit));
        result
    }

    /// Forces the qubit back to |0⟩ by folding the |1⟩ probability mass into
    /// the matching |0⟩ states, then clears the measured flag.
    pub fn reset(&mut self, qubit: usize) {
        let size = self.state.len();
        let mask = 1 << qubit;
        for i in 0..size {
            if i & mask != 0 {
                let j = i & !mask;
                let low = self.state[j].norm_sqr();
                let high = self.state[i].norm_sqr();
                let magnitude = (low + high).sqrt();
                // Phase of the surviving |0⟩ component is kept when present
                self.state[j] = if low > 0.0 {
                    self.state[j] / low.sqrt() * magnitude
                } else {
                    Complex::new(magnitude, 0.0)
                };
                self.state[i] = Complex::new(0.0, 0.0);
            }
        }
        self.measured[qubit] = false;
        self.last_outcome[qubit] = None;
        self.log(format!("reset q[{}];", qubit));
    }

    fn apply_single<F>(&mut self, qubit: usize, f: F)
    where
        F: Fn(Complex<f64>, Complex<f64>) -> (Complex<f64>, Complex<f64>),
    {
        let size = self.state.len();
        let mask = 1 << qubit;
        for i in 0..size {
            if i & mask == 0 {
                let j = i | mask;
                let (a, b) = (self.state[i], self.state[j]);
                let (na, nb) = f(a, b);
                self.state[i] = na;
                self.state[j] = nb;
            }
        }
    }

    pub fn probability_of_one(&self, qubit: usize) -> f64 {
        self.state
            .iter()
            .enumerate()
            .filter(|(i, _)| i & (1 << qubit) != 0)
            .map(|(_, amp)| amp.norm_sqr())
            .sum()
    }

    fn log(&mut self, line: String) {
        if self.log_gates {
            self.ops.push(line);
        }
    }

    /// Renders the OpenQASM 2.0 transcript: preamble, registers sized to
    /// the final qubit count, then the operation log.
    pub fn qasm(&self) -> String {
        let mut out = String::new();
        out.push_str("OPENQASM 2.0;\n");
        out.push_str("include \"qelib1.inc\";\n");
        if self.num_qubits > 0 {
            out.push_str(&format!("qreg q[{}];\n", self.num_qubits));
            out.push_str(&format!("creg c[{}];\n", self.num_qubits));
        }
        for op in &self.ops {
            out.push_str(op);
            out.push('\n');
        }
        out
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn state_doubles_per_allocation() {
        let mut sim = Simulator::new();
        for k in 1..=4 {
            sim.allocate_qubit();
            assert_eq!(sim.state_len(), 1 << k);
        }
    }

    #[test]
    fn x_flips_and_measure_is_deterministic() {
        let mut sim = Simulator::new();
        let q = sim.allocate_qubit();
        sim.x(q);
        assert!((sim.probability_of_one(q) - 1.0).abs() < EPS);
        assert_eq!(sim.measure(q), 1);
        assert!(sim.is_measured(q));
        assert_eq!(sim.last_outcome(q), Some(1));
    }

    #[test]
    fn h_splits_amplitude_evenly() {
        let mut sim = Simulator::new();
        let q = sim.allocate_qubit();
        sim.h(q);
        assert!((sim.probability_of_one(q) - 0.5).abs() < EPS);
    }

    #[test]
    fn cx_entangles_basis_states() {
        let mut sim = Simulator::new();
        let control = sim.allocate_qubit();
        let target = sim.allocate_qubit();
        sim.x(control);
        sim.cx(control, target);
        assert!((sim.probability_of_one(target) - 1.0).abs() < EPS);
    }

    #[test]
    fn reset_returns_qubit_to_zero_and_clears_flag() {
        let mut sim = Simulator::new();
        let q = sim.allocate_qubit();
        sim.x(q);
        sim.measure(q);
        sim.reset(q);
        assert!(!sim.is_measured(q));
        assert!(sim.probability_of_one(q) < EPS);
        assert_eq!(sim.last_outcome(q), None);
    }

    #[test]
    fn ry_rotates_probability() {
        let mut sim = Simulator::new();
        let q = sim.allocate_qubit();
        sim.ry(q, std::f64::consts::PI);
        assert!((sim.probability_of_one(q) - 1.0).abs() < EPS);
    }

    #[test]
    fn qasm_log_records_every_operation_in_order() {
        let mut sim = Simulator::new();
        let a = sim.allocate_qubit();
        let b = sim.allocate_qubit();
        sim.h(a);
        sim.cx(a, b);
        sim.measure(b);
        sim.reset(a);
        let qasm = sim.qasm();
        let expected = "OPENQASM 2.0;\ninclude \"qelib1.inc\";\nqreg q[2];\ncreg c[2];\nh q[0];\ncx q[0], q[1];\nmeasure q[1] -> c[1];\nreset q[0];\n";
        assert_eq!(qasm, expected);
    }

    #[test]
    fn suppressed_log_keeps_preamble_and_registers() {
        let mut sim = Simulator::new();
        sim.set_logging(false);
        let q = sim.allocate_qubit();
        sim.h(q);
        let qasm = sim.qasm();
        assert!(qasm.contains("OPENQASM 2.0;"));
        assert!(qasm.contains("qreg q[1];"));
        assert!(!qasm.contains("h q[0];"));
    }
}
